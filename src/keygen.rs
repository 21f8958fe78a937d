//! Response cache key derivation
//!
//! Keys have the layout
//!
//! ```text
//! api:response:{METHOD}:{normalized path}:?{sorted query}
//! ```
//!
//! Requests that differ only in query parameter order or in duplicate or
//! trailing path separators derive byte-identical keys.

use std::collections::BTreeMap;
use url::form_urlencoded;

/// Namespace of every response cache key
pub const RESPONSE_KEY_PREFIX: &str = "api:response:";

/// Path prefixes that are never cacheable, whatever the method
pub const CACHE_EXEMPT_PREFIXES: [&str; 4] = ["/login", "/register", "/auth/token", "/auth/refresh"];

/// Derive the cache key for a request
#[must_use]
pub fn derive_key(method: &str, path: &str, raw_query: &str) -> String {
    format!(
        "{RESPONSE_KEY_PREFIX}{}:{}:?{}",
        method.to_ascii_uppercase(),
        normalize_path(path),
        canonical_query(raw_query)
    )
}

/// Derive a key scoped to one subject
///
/// The `:user:{subject}:` suffix is what
/// [`Invalidator::invalidate_user_related_cache`](crate::invalidation::Invalidator::invalidate_user_related_cache)
/// matches with `api:response:*:user:{subject}:*`.
#[must_use]
pub fn derive_user_scoped_key(method: &str, path: &str, raw_query: &str, subject_id: &str) -> String {
    format!("{}:user:{subject_id}:", derive_key(method, path, raw_query))
}

/// Collapse runs of `/` and strip one trailing `/`; the root path is unchanged
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len().max(1));
    let mut previous_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !previous_slash {
                normalized.push(c);
            }
            previous_slash = true;
        } else {
            normalized.push(c);
            previous_slash = false;
        }
    }

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Group query parameters by name, sort the names, keep value order within a name
///
/// Values are re-encoded with `application/x-www-form-urlencoded` rules.
#[must_use]
pub fn canonical_query(raw_query: &str) -> String {
    let raw_query = raw_query.strip_prefix('?').unwrap_or(raw_query);
    if raw_query.is_empty() {
        return String::new();
    }

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        groups
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    let mut parts = Vec::new();
    for (name, values) in &groups {
        for value in values {
            let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
            parts.push(format!("{name}={encoded}"));
        }
    }
    parts.join("&")
}

/// Whether `path` falls under the never-cache deny-list
#[must_use]
pub fn is_cache_exempt(path: &str) -> bool {
    let path = normalize_path(path);
    CACHE_EXEMPT_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Escape glob metacharacters so a literal can be embedded in a SCAN pattern
#[must_use]
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
