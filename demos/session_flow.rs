//! Session Flow Example
//!
//! Walks one request lifecycle through the cache subsystem using the
//! in-memory store: admission, authentication, response caching and
//! invalidation after a profile update.
//!
//! Run with: cargo run --example `session_flow`

use anyhow::{Result, bail};
use session_cache_guard::telemetry::init_tracing;
use session_cache_guard::{
    CacheLookup, CacheSubsystemBuilder, MemoryStore, RequestContext, SubjectDirectory,
    SubsystemConfig, TokenVerifier, UserAttributes, async_trait,
};
use std::sync::Arc;

/// Source of record with a single user
struct Directory;

fn alice() -> UserAttributes {
    UserAttributes {
        name: "Alice".into(),
        email: "alice@example.com".into(),
        role: "user".into(),
        email_verified: true,
    }
}

#[async_trait]
impl SubjectDirectory for Directory {
    async fn fetch_by_subject_id(&self, subject_id: &str) -> Result<Option<UserAttributes>> {
        Ok((subject_id == "u1").then(alice))
    }

    async fn fetch_by_email(&self, email: &str) -> Result<Option<(String, UserAttributes)>> {
        Ok((email == "alice@example.com").then(|| ("u1".to_string(), alice())))
    }
}

/// Treats `token-{subject}` as a valid token
struct Verifier;

impl TokenVerifier for Verifier {
    fn verify_token(&self, token: &str) -> Result<String> {
        match token.strip_prefix("token-") {
            Some(subject) => Ok(subject.to_string()),
            None => bail!("unrecognized token"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    println!("=== Session Cache Guard: Request Flow ===\n");

    let cache = CacheSubsystemBuilder::new(SubsystemConfig::default())
        .with_store(Arc::new(MemoryStore::new()))
        .build()
        .await?;
    cache.on_availability_change(|available| println!("   availability -> {available}"));
    println!("Cache available: {}\n", cache.is_available());

    let auth = cache.authenticator(Arc::new(Directory), Arc::new(Verifier));

    // 1. Login
    let session = auth.establish_session("alice@example.com").await?;
    println!("1. Logged in {} with session token {}", session.subject_id, session.session_token);

    // 2. Authenticated request
    let req = RequestContext::new("GET", "/users/u1")
        .with_query("fields=name,email")
        .with_client_addr("203.0.113.7")
        .with_subject("u1");
    let ticket = cache.admit(&req).await?;
    let subject = auth.authenticate("Bearer token-u1").await?;
    println!("2. Authenticated {} from {:?}", subject.subject_id, subject.source);

    // 3. Response cache: miss, store, hit
    if let Some(responses) = cache.response_cache() {
        let lookup = responses.lookup(&req).await;
        println!("3. First lookup: X-Cache = {:?}", lookup.header_value());
        if let CacheLookup::Miss { key } = &lookup {
            responses.store(key, 200, br#"{"name":"Alice"}"#).await;
        }
        let lookup = responses.lookup(&req).await;
        println!("   Second lookup: X-Cache = {:?}", lookup.header_value());
    }
    cache.complete(ticket.as_ref(), 200).await;

    // 4. Profile update invalidates everything cached for the subject
    let removed = cache.invalidator().invalidate_user_related_cache("u1").await;
    println!("4. Profile updated, removed {removed} cached entries");

    // 5. Next request goes back to the source of record
    let subject = auth.authenticate("Bearer token-u1").await?;
    println!("5. Re-authenticated from {:?}", subject.source);

    if let Some(limiter) = cache.rate_limiter() {
        let (max, window) = limiter.limit();
        println!("\nRate limit: {max} requests per {}s", window.as_secs());
    }

    cache.shutdown();
    println!("\n=== Done ===");
    Ok(())
}
