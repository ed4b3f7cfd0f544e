//! Branch credential cache
//!
//! Branch endpoints are reached with short-lived tokens from the workspace
//! credential issuer. One token is cached at a time and reused until its
//! local expiry; the issuer's own expiry claim is not consulted.

use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validity window applied to every issued token
pub const CREDENTIAL_TTL_MINUTES: i64 = 60;

/// A token as returned by the issuer
#[derive(Clone)]
pub struct IssuedCredential {
    pub token: String,
    /// Expiry claimed by the issuer; informational only
    pub server_expiry: Option<DateTime<Utc>>,
}

/// Issues database credentials for branch endpoints
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, endpoint: &str) -> Result<IssuedCredential, AppError>;
}

/// A cached token. Replaced wholesale on refresh, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub endpoint: String,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("endpoint", &self.endpoint)
            .field("token", &"****")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Single-slot token cache
pub struct CredentialCache {
    issuer: Arc<dyn CredentialIssuer>,
    ttl: Duration,
    slot: Option<Credential>,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self {
            issuer,
            ttl: Duration::minutes(CREDENTIAL_TTL_MINUTES),
            slot: None,
        }
    }

    /// Return the cached token for `endpoint`, or issue a new one
    pub async fn get_or_refresh(&mut self, endpoint: &str) -> Result<Credential, AppError> {
        self.get_or_refresh_at(endpoint, Utc::now()).await
    }

    pub(crate) async fn get_or_refresh_at(
        &mut self,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<Credential, AppError> {
        if let Some(cached) = &self.slot {
            if cached.endpoint == endpoint && cached.is_valid_at(now) {
                debug!(%endpoint, expires_at = %cached.expires_at, "Credential still valid");
                return Ok(cached.clone());
            }
            if cached.endpoint != endpoint {
                debug!(
                    previous = %cached.endpoint,
                    %endpoint,
                    "Credential slot switching endpoint"
                );
            }
        }

        let issued = self.issuer.issue(endpoint).await.map_err(|e| {
            warn!(%endpoint, error = %e, "Credential issuance failed");
            match e {
                AppError::Credential(_) => e,
                other => AppError::Credential(other.to_string()),
            }
        })?;

        if let Some(claimed) = issued.server_expiry {
            debug!(%endpoint, %claimed, "Ignoring issuer-claimed expiry");
        }

        let credential = Credential {
            endpoint: endpoint.to_string(),
            token: issued.token,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        info!(%endpoint, expires_at = %credential.expires_at, "Credential issued");

        self.slot = Some(credential.clone());
        Ok(credential)
    }

    /// The credential currently held, if any
    pub fn current(&self) -> Option<&Credential> {
        self.slot.as_ref()
    }

    /// Forget the cached credential
    pub fn invalidate(&mut self) {
        self.slot = None;
    }
}
