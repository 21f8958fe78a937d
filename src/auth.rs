//! Session-backed request authentication
//!
//! ```text
//! TRY_CACHE ─hit──────────────────────────────────────────▶ DONE
//!     └─miss─▶ QUERY_SOURCE_OF_RECORD ─▶ POPULATE_CACHE_ASYNC ─▶ DONE
//!                     └─failure─▶ UNAUTHENTICATED
//! ```
//!
//! Cache population on the miss path runs in a detached task with its own
//! timeout; the response never waits for it and never sees its outcome.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::session::{SessionCache, SessionRecord, UserAttributes, new_session_token};
use crate::traits::{SubjectDirectory, TokenVerifier};

/// Default bound on a detached cache population
pub const DEFAULT_POPULATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Authentication failure visible to the HTTP layer
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("please authenticate")]
    Unauthenticated,
}

/// Where an authenticated identity was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSource {
    Cache,
    SourceOfRecord,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSubject {
    pub subject_id: String,
    pub attributes: UserAttributes,
    pub source: SessionSource,
}

/// Resolves bearer tokens to subjects, cache first
#[derive(Clone)]
pub struct SessionAuthenticator {
    sessions: SessionCache,
    directory: Arc<dyn SubjectDirectory>,
    verifier: Arc<dyn TokenVerifier>,
    population_timeout: Duration,
}

impl SessionAuthenticator {
    pub fn new(
        sessions: SessionCache,
        directory: Arc<dyn SubjectDirectory>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            sessions,
            directory,
            verifier,
            population_timeout: DEFAULT_POPULATION_TIMEOUT,
        }
    }

    /// Override the bound on detached cache population
    #[must_use]
    pub fn with_population_timeout(mut self, timeout: Duration) -> Self {
        self.population_timeout = timeout;
        self
    }

    /// Authenticate an `Authorization` header value
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] for a missing or invalid token,
    /// or when the source of record cannot resolve the subject.
    pub async fn authenticate(&self, authorization: &str) -> Result<AuthenticatedSubject, AuthError> {
        let token = authorization
            .strip_prefix("Bearer ")
            .unwrap_or(authorization)
            .trim();
        if token.is_empty() {
            return Err(AuthError::Unauthenticated);
        }

        let subject_id = self.verifier.verify_token(token).map_err(|e| {
            debug!(error = %e, "Token verification failed");
            AuthError::Unauthenticated
        })?;

        if let Ok(record) = self.sessions.fetch(&subject_id).await {
            return Ok(AuthenticatedSubject {
                attributes: record.attributes(),
                subject_id,
                source: SessionSource::Cache,
            });
        }

        let attributes = match self.directory.fetch_by_subject_id(&subject_id).await {
            Ok(Some(attributes)) => attributes,
            Ok(None) => {
                debug!(subject_id = %subject_id, "Subject not found in source of record");
                return Err(AuthError::Unauthenticated);
            }
            Err(e) => {
                warn!(subject_id = %subject_id, error = %e, "Source of record lookup failed");
                return Err(AuthError::Unauthenticated);
            }
        };

        self.populate_detached(subject_id.clone(), attributes.clone());

        Ok(AuthenticatedSubject {
            subject_id,
            attributes,
            source: SessionSource::SourceOfRecord,
        })
    }

    /// Open a session after credentials were verified elsewhere
    ///
    /// The session record is written synchronously; a cache failure is
    /// logged and the record (with its fresh token) is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Unauthenticated`] if the subject cannot be
    /// resolved by email.
    pub async fn establish_session(&self, email: &str) -> Result<SessionRecord, AuthError> {
        let (subject_id, attributes) = match self.directory.fetch_by_email(email).await {
            Ok(Some(found)) => found,
            Ok(None) => return Err(AuthError::Unauthenticated),
            Err(e) => {
                warn!(error = %e, "Source of record lookup by email failed");
                return Err(AuthError::Unauthenticated);
            }
        };

        match self.sessions.issue(&subject_id, &attributes).await {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => {}
            Err(e) => warn!(subject_id = %subject_id, error = %e, "Failed to cache new session"),
        }

        // Cache unavailable or failed: the caller still needs a token for its cookie
        let token = new_session_token().map_err(|e| {
            error!(error = %e, "Could not mint session token");
            AuthError::Unauthenticated
        })?;
        Ok(SessionRecord::new(&subject_id, &attributes, token))
    }

    fn populate_detached(&self, subject_id: String, attributes: UserAttributes) {
        let sessions = self.sessions.clone();
        let limit = self.population_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(limit, sessions.store(&subject_id, &attributes)).await {
                Ok(Ok(())) => debug!(subject_id = %subject_id, "Session cache populated"),
                Ok(Err(e)) => {
                    warn!(subject_id = %subject_id, error = %e, "Failed to populate session cache");
                }
                Err(_) => {
                    warn!(subject_id = %subject_id, timeout_secs = limit.as_secs(), "Session cache population timed out");
                }
            }
        });
    }
}

impl std::fmt::Debug for SessionAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAuthenticator")
            .field("sessions", &self.sessions)
            .field("population_timeout", &self.population_timeout)
            .finish_non_exhaustive()
    }
}
