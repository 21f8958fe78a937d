//! Session cache protocol
//!
//! Session records live under `session:user:{subject_id}` and are replaced,
//! never updated in place. Reads collapse every failure into
//! [`CacheError::Miss`] so callers have exactly one fallback path: the source
//! of record.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::codecs::JsonCodec;
use crate::error::{CacheError, CacheResult};
use crate::facade::CacheFacade;
use crate::traits::CacheCodec;

/// Key namespace for session records
pub const SESSION_KEY_PREFIX: &str = "session:user:";

/// Random bytes in a session token
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Cache key of a subject's session record
#[must_use]
pub fn session_key(subject_id: &str) -> String {
    format!("{SESSION_KEY_PREFIX}{subject_id}")
}

/// Mint an opaque session token: 32 bytes from the OS entropy source, URL-safe base64
///
/// # Errors
///
/// Returns [`CacheError::Entropy`] if the entropy source fails.
pub fn new_session_token() -> CacheResult<String> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CacheError::Entropy(e.to_string()))?;
    Ok(URL_SAFE.encode(bytes))
}

/// Identity attributes provided by the source of record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAttributes {
    pub name: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
}

/// Cached session of one subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(rename = "id")]
    pub subject_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub email: String,
    pub role: String,
    #[serde(rename = "verified_email")]
    pub email_verified: bool,
    #[serde(rename = "session_id")]
    pub session_token: String,
    /// Creation time, seconds since the Unix epoch
    pub created_at: i64,
}

impl SessionRecord {
    /// Build a record stamped with the current time
    #[must_use]
    pub fn new(subject_id: &str, attributes: &UserAttributes, session_token: String) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self {
            subject_id: subject_id.to_string(),
            display_name: attributes.name.clone(),
            email: attributes.email.clone(),
            role: attributes.role.clone(),
            email_verified: attributes.email_verified,
            session_token,
            created_at,
        }
    }

    /// Identity attributes carried by this record
    #[must_use]
    pub fn attributes(&self) -> UserAttributes {
        UserAttributes {
            name: self.display_name.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            email_verified: self.email_verified,
        }
    }
}

/// Session store/fetch/invalidate over the cache facade
pub struct SessionCache<C: CacheCodec = JsonCodec> {
    facade: CacheFacade,
    codec: Arc<C>,
    ttl: Duration,
}

impl SessionCache<JsonCodec> {
    /// Session cache with the JSON codec
    #[must_use]
    pub fn new(facade: CacheFacade, ttl: Duration) -> Self {
        Self::with_codec(facade, ttl, JsonCodec)
    }
}

impl<C: CacheCodec> SessionCache<C> {
    /// Session cache with a custom codec
    pub fn with_codec(facade: CacheFacade, ttl: Duration, codec: C) -> Self {
        Self {
            facade,
            codec: Arc::new(codec),
            ttl,
        }
    }

    /// TTL applied to every record
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether writes will currently reach the store
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.facade.is_available()
    }

    /// Write a fresh session for `subject_id`
    ///
    /// Succeeds without doing anything while the cache is unavailable.
    ///
    /// # Errors
    ///
    /// Returns the wrapped store error if the write fails, or
    /// [`CacheError::Serialization`] if the record cannot be encoded.
    pub async fn store(&self, subject_id: &str, attributes: &UserAttributes) -> CacheResult<()> {
        self.issue(subject_id, attributes).await.map(|_| ())
    }

    /// Like [`SessionCache::store`], returning the record that was written
    ///
    /// Returns `Ok(None)` when the cache is unavailable and nothing was written.
    ///
    /// # Errors
    ///
    /// Same as [`SessionCache::store`], plus [`CacheError::Entropy`].
    pub async fn issue(
        &self,
        subject_id: &str,
        attributes: &UserAttributes,
    ) -> CacheResult<Option<SessionRecord>> {
        if !self.facade.is_available() {
            debug!(subject_id = %subject_id, "Session cache unavailable, skipping store");
            return Ok(None);
        }

        let record = SessionRecord::new(subject_id, attributes, new_session_token()?);
        self.write(&record).await?;
        Ok(Some(record))
    }

    /// Read the cached session for `subject_id`
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Miss`] when the cache is unavailable, the key is
    /// absent, the store fails, or the payload cannot be decoded.
    pub async fn fetch(&self, subject_id: &str) -> CacheResult<SessionRecord> {
        if !self.facade.is_available() {
            return Err(CacheError::Miss);
        }

        let key = session_key(subject_id);
        let bytes = match self
            .facade
            .execute_guarded(|store| {
                let key = key.clone();
                async move { store.get(&key).await }
            })
            .await
        {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(CacheError::Miss),
            Err(e) => {
                debug!(key = %key, error = %e, "Session read failed, treating as miss");
                return Err(CacheError::Miss);
            }
        };

        match self.codec.deserialize::<SessionRecord>(&bytes) {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    key = %key,
                    codec = self.codec.name(),
                    error = %e,
                    "Malformed session record, treating as miss"
                );
                Err(CacheError::Miss)
            }
        }
    }

    /// Delete the cached session for `subject_id`
    ///
    /// Best-effort: returns whether the delete reached the store, never an
    /// error. While the cache is unavailable nothing is sent and the result
    /// is `false`; reads miss in that state anyway.
    pub async fn invalidate(&self, subject_id: &str) -> bool {
        if !self.facade.is_available() {
            return false;
        }
        let key = session_key(subject_id);
        match self
            .facade
            .execute_guarded(|store| {
                let key = key.clone();
                async move { store.remove(&key).await }
            })
            .await
        {
            Ok(()) => {
                debug!(key = %key, "Session invalidated");
                true
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to invalidate session");
                false
            }
        }
    }

    /// Replace a subject's session after a privilege change
    ///
    /// Invalidates the old record, mints a new token and writes the new
    /// record. The token is returned even when the cache is unavailable so
    /// the caller can still reissue its cookie.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Entropy`] if no token could be minted. Store
    /// failures are logged, not returned.
    pub async fn rotate(&self, subject_id: &str, attributes: &UserAttributes) -> CacheResult<String> {
        self.invalidate(subject_id).await;

        let token = new_session_token()?;
        if self.facade.is_available() {
            let record = SessionRecord::new(subject_id, attributes, token.clone());
            if let Err(e) = self.write(&record).await {
                warn!(subject_id = %subject_id, error = %e, "Failed to store rotated session");
            }
        }
        Ok(token)
    }

    /// React to an identity update in the source of record
    ///
    /// A role change rotates the session and returns the new token; any
    /// other change only invalidates.
    ///
    /// # Errors
    ///
    /// Same as [`SessionCache::rotate`].
    pub async fn refresh_after_update(
        &self,
        subject_id: &str,
        attributes: &UserAttributes,
        role_changed: bool,
    ) -> CacheResult<Option<String>> {
        if role_changed {
            self.rotate(subject_id, attributes).await.map(Some)
        } else {
            self.invalidate(subject_id).await;
            Ok(None)
        }
    }

    async fn write(&self, record: &SessionRecord) -> CacheResult<()> {
        let bytes = self
            .codec
            .serialize(record)
            .map_err(CacheError::Serialization)?;
        let key = session_key(&record.subject_id);
        let ttl = self.ttl;

        self.facade
            .execute_guarded(|store| {
                let key = key.clone();
                async move { store.set_with_ttl(&key, &bytes, ttl).await }
            })
            .await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Session stored");
        Ok(())
    }
}

impl<C: CacheCodec> Clone for SessionCache<C> {
    fn clone(&self) -> Self {
        Self {
            facade: self.facade.clone(),
            codec: Arc::clone(&self.codec),
            ttl: self.ttl,
        }
    }
}

impl<C: CacheCodec> std::fmt::Debug for SessionCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("facade", &self.facade)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
