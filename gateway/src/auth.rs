//! Caller authorization.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use simplebank_common::Owner;

use crate::error::{GatewayError, GatewayResult};

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Owner name every ownership check compares against.
    pub owner: Owner,
}

/// Resolves a credential to the identity behind it.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorize a credential, failing with [`GatewayError::Unauthenticated`].
    async fn authorize(&self, credential: &str) -> GatewayResult<Identity>;
}

/// Opaque-token authorizer.
///
/// Tokens are random v4 UUIDs mapped to the owner they were issued to.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: DashMap<String, Owner>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token for an owner.
    pub fn issue(&self, owner: impl Into<Owner>) -> GatewayResult<String> {
        let owner = owner.into();
        if !owner.is_valid() {
            return Err(GatewayError::InvalidOwner(owner.to_string()));
        }

        let token = Uuid::new_v4().to_string();
        info!(owner = %owner, "Issued access token");
        self.tokens.insert(token.clone(), owner);
        Ok(token)
    }

    /// Revoke a token. Returns whether it was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authorizer for TokenRegistry {
    async fn authorize(&self, credential: &str) -> GatewayResult<Identity> {
        let credential = credential.trim();
        let credential = credential.strip_prefix("Bearer ").unwrap_or(credential);

        match self.tokens.get(credential) {
            Some(owner) => Ok(Identity {
                owner: owner.value().clone(),
            }),
            None => {
                debug!("Rejected unknown credential");
                Err(GatewayError::Unauthenticated)
            }
        }
    }
}
