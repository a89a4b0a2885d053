//! Identity providers that supply the bearer credential used to open a session.
//!
//! The session manager only ever asks for a credential through
//! [`IdentityProvider::get_credential`]. How the token was obtained (hosted
//! login, device flow, a file dropped by another tool) is outside this crate.
//!
//! - [`StaticToken`]: a fixed token from configuration
//! - [`TokenFile`]: re-reads a token file on every request
//! - [`CachedProvider`]: reuses a credential until its JWT `exp` is near

use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

/// Default refresh margin before a cached token's expiry.
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(60);

/// Errors returned by identity providers.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No credential is available (signed out, empty token, missing file).
    #[error("no credential available: {0}")]
    NoCredential(String),

    /// Reading the credential source failed.
    #[error("failed to read credential: {0}")]
    Io(#[from] std::io::Error),
}

/// An opaque bearer credential.
///
/// The value is redacted from `Debug` output so it never lands in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token. Returns `None` when the token is blank.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The raw token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Expiry time (UNIX seconds) if the token is a JWT carrying `exp`.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        jwt_expiry(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Source of bearer credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fetch a credential. May be called repeatedly; implementations decide
    /// whether to re-fetch or reuse.
    async fn get_credential(&self) -> Result<Credential, IdentityError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Static token
// ─────────────────────────────────────────────────────────────────────────────

/// Provider backed by a token known up front.
#[derive(Debug, Clone)]
pub struct StaticToken {
    credential: Option<Credential>,
}

impl StaticToken {
    /// Create a provider from a raw token. A blank token yields a provider
    /// that always reports `NoCredential`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticToken {
    async fn get_credential(&self) -> Result<Credential, IdentityError> {
        self.credential
            .clone()
            .ok_or_else(|| IdentityError::NoCredential("configured token is empty".into()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token file
// ─────────────────────────────────────────────────────────────────────────────

/// Provider that reads the token from a file on every call.
///
/// Lets an external login flow rotate the token without restarting the client.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    /// Create a provider for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl IdentityProvider for TokenFile {
    async fn get_credential(&self) -> Result<Credential, IdentityError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IdentityError::NoCredential(format!(
                    "token file {} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        Credential::new(contents).ok_or_else(|| {
            IdentityError::NoCredential(format!("token file {} is empty", self.path.display()))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Caching wrapper
// ─────────────────────────────────────────────────────────────────────────────

/// Caches the inner provider's credential until it is about to expire.
#[derive(Debug)]
pub struct CachedProvider<P> {
    inner: P,
    skew: Duration,
    cached: Mutex<Option<Credential>>,
}

impl<P: IdentityProvider> CachedProvider<P> {
    /// Wrap a provider with the default refresh skew.
    #[must_use]
    pub fn new(inner: P) -> Self {
        Self::with_skew(inner, DEFAULT_REFRESH_SKEW)
    }

    /// Wrap a provider, refreshing `skew` before the token expires.
    #[must_use]
    pub fn with_skew(inner: P, skew: Duration) -> Self {
        Self {
            inner,
            skew,
            cached: Mutex::new(None),
        }
    }

    /// Drop the cached credential so the next call re-fetches.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = None;
        }
    }

    fn is_fresh(&self, credential: &Credential) -> bool {
        match credential.expires_at() {
            Some(exp) => {
                let skew = i64::try_from(self.skew.as_secs()).unwrap_or(i64::MAX);
                Utc::now().timestamp().saturating_add(skew) < exp
            }
            None => true,
        }
    }
}

#[async_trait]
impl<P: IdentityProvider> IdentityProvider for CachedProvider<P> {
    async fn get_credential(&self) -> Result<Credential, IdentityError> {
        let cached = self.cached.lock().ok().and_then(|guard| guard.clone());
        if let Some(credential) = cached {
            if self.is_fresh(&credential) {
                return Ok(credential);
            }
            tracing::debug!(name: "identity.cache.expired", "Cached credential is expiring, refreshing");
        }

        let credential = self.inner.get_credential().await?;
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(credential.clone());
        }
        Ok(credential)
    }
}

#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim without verifying the signature; the backend is the
/// verifier, the client only needs to know when to refresh.
fn jwt_expiry(token: &str) -> Option<i64> {
    jsonwebtoken::dangerous::insecure_decode::<ExpiryClaims>(token)
        .ok()
        .and_then(|data| data.claims.exp)
}
