//! Sign-in contract. The engine only needs to know whether a stable user
//! identity is present; how it was obtained is the provider's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub uid: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Bearer token presented to the remote store, when it requires one.
    #[serde(default, skip_serializing)]
    pub id_token: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("sign-in was cancelled")]
    Cancelled,
    #[error("sign-in was denied: {0}")]
    Denied(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self) -> Result<Identity, IdentityError>;
    async fn sign_out(&self) -> Result<(), IdentityError>;
}

/// Identity issued out of band (environment or config file).
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    identity: Option<Identity>,
}

impl StaticIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
        }
    }

    /// A provider with nothing configured; every sign-in is denied.
    pub fn unconfigured() -> Self {
        Self { identity: None }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn sign_in(&self) -> Result<Identity, IdentityError> {
        self.identity
            .clone()
            .ok_or_else(|| IdentityError::Denied("no identity configured".into()))
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        Ok(())
    }
}
