//! Memory Store - In-Process `DashMap` Backend
//!
//! A [`KeyValueStore`] kept entirely in process memory. It mirrors the Redis
//! semantics the subsystem relies on (per-key TTL, glob `SCAN`, sorted-set
//! sliding windows) so single-node deployments and tests can run without a
//! network store.

use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::traits::KeyValueStore;

/// Value held under one key
#[derive(Debug, Clone)]
enum Slot {
    Bytes(Vec<u8>),
    /// Sliding-window hits as `(score_ms, member)`
    Window(Vec<(u64, String)>),
}

/// Store entry with expiration tracking
#[derive(Debug, Clone)]
struct StoreEntry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(slot: Slot, ttl: Duration) -> Self {
        Self {
            slot,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

/// Concurrent in-memory store using `DashMap`
///
/// **Limitations**:
/// - Not shared between processes
/// - No size limits; expired entries are dropped lazily on access or by
///   [`MemoryStore::cleanup_expired`]
///
/// **Example**:
/// ```rust
/// use session_cache_guard::backends::MemoryStore;
/// use session_cache_guard::KeyValueStore;
/// use std::time::Duration;
///
/// # async fn example() -> anyhow::Result<()> {
/// let store = MemoryStore::new();
/// store.set_with_ttl("session:user:1", b"{}", Duration::from_secs(60)).await?;
/// assert_eq!(store.get("session:user:1").await?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryStore {
    map: Arc<DashMap<String, StoreEntry>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        info!("Initializing in-memory store (DashMap)");
        Self {
            map: Arc::new(DashMap::new()),
        }
    }

    /// Remove expired entries
    pub fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        self.map.retain(|_, entry| {
            if entry.is_expired() {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(count = removed, "[Memory] Cleaned up expired entries");
        }
        removed
    }

    /// Number of live keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.iter().filter(|e| !e.value().is_expired()).count()
    }

    /// Whether no live keys remain
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` exists and has not expired
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.get(key).is_some_and(|e| !e.is_expired())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.map.get(key) else {
            return Ok(None);
        };
        if entry.is_expired() {
            drop(entry); // Release read lock
            self.map.remove(key);
            return Ok(None);
        }
        match &entry.slot {
            Slot::Bytes(value) => Ok(Some(value.clone())),
            Slot::Window(_) => bail!("WRONGTYPE key {key} holds a sliding window"),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.map.insert(
            key.to_string(),
            StoreEntry::new(Slot::Bytes(value.to_vec()), ttl),
        );
        debug!(key = %key, ttl_secs = %ttl.as_secs(), "[Memory] Cached key with TTL");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn remove_bulk(&self, keys: &[String]) -> Result<usize> {
        let count = keys
            .iter()
            .filter_map(|key| self.map.remove(key))
            .filter(|(_, entry)| !entry.is_expired())
            .count();
        debug!(count = count, "[Memory] Removed keys in bulk");
        Ok(count)
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .map
            .iter()
            .filter(|e| !e.value().is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        debug!(pattern = %pattern, count = keys.len(), "[Memory] Scanned keys matching pattern");
        Ok(keys)
    }

    async fn window_record(
        &self,
        key: &str,
        member: &str,
        now_ms: u64,
        window: Duration,
    ) -> Result<u64> {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms.saturating_sub(window_ms);

        let mut entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| StoreEntry::new(Slot::Window(Vec::new()), window));
        if entry.is_expired() {
            *entry = StoreEntry::new(Slot::Window(Vec::new()), window);
        }

        let Slot::Window(hits) = &mut entry.slot else {
            bail!("WRONGTYPE key {key} does not hold a sliding window");
        };
        hits.retain(|(score, m)| *score > cutoff && m != member);
        hits.push((now_ms, member.to_string()));
        let count = hits.len() as u64;
        entry.expires_at = Some(Instant::now() + window);
        Ok(count)
    }

    async fn window_forget(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut entry) = self.map.get_mut(key) {
            if let Slot::Window(hits) = &mut entry.slot {
                hits.retain(|(_, m)| m != member);
            }
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

/// Redis-style glob match: `*`, `?`, `[abc]`, `[^a-z]` and `\` escapes
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Pattern index just past the last `*`, and the text index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while let Some(&c) = text.get(t) {
        let rest = pattern.get(p..).unwrap_or_default();
        if let ['*', ..] = rest {
            p += 1;
            star = Some((p, t));
            continue;
        }

        if let Some(consumed) = match_token(rest, c) {
            p += consumed;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            // Let the last `*` swallow one more character and retry
            p = star_p;
            t = star_t + 1;
            star = Some((star_p, t));
        } else {
            return false;
        }
    }

    pattern
        .get(p..)
        .unwrap_or_default()
        .iter()
        .all(|&ch| ch == '*')
}

/// Match `c` against the single-character token at the start of `pattern`,
/// returning how many pattern characters the token spans
fn match_token(pattern: &[char], c: char) -> Option<usize> {
    match pattern {
        [] | ['*', ..] => None,
        ['?', ..] => Some(1),
        ['[', body @ ..] => match match_class(body, c) {
            Some((matched, after)) => matched.then_some(pattern.len() - after.len()),
            // Unterminated class: `[` is literal
            None => (c == '[').then_some(1),
        },
        ['\\', literal, ..] => (*literal == c).then_some(2),
        [literal, ..] => (*literal == c).then_some(1),
    }
}

/// Match one character against a class body (after `[`), returning the rest of the pattern
fn match_class(body: &[char], c: char) -> Option<(bool, &[char])> {
    let (negate, mut body) = match body {
        ['^', rest @ ..] => (true, rest),
        _ => (false, body),
    };
    let mut matched = false;
    loop {
        match body {
            [] => return None,
            [']', after @ ..] => return Some((matched != negate, after)),
            ['\\', escaped, after @ ..] => {
                matched |= *escaped == c;
                body = after;
            }
            [lo, '-', hi, after @ ..] if *hi != ']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                matched |= (lo..=hi).contains(&c);
                body = after;
            }
            [ch, after @ ..] => {
                matched |= *ch == c;
                body = after;
            }
        }
    }
}
