//! Read-only access to the registrar contracts.
//!
//! [`ChainClient`] is the one seam to the chain; the production
//! implementation is [`rpc::JsonRpcChainClient`].

use std::fmt;

use async_trait::async_trait;

use crate::domain::OwnershipCheck;
use crate::domain::intent::chain_timestamp;
use crate::error::GatewayError;

pub mod rpc;

pub use rpc::JsonRpcChainClient;

/// Latest confirmed registrar state.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// `commitments(commitment)` on the controller; `0` means not observed.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] on RPC failure.
    async fn commitment_timestamp(&self, commitment: &str) -> Result<u64, GatewayError>;

    /// `nameExpires(labelhash)` on the base registrar; `0` means never registered.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] on RPC failure.
    async fn name_expires(&self, label: &str) -> Result<u64, GatewayError>;

    /// `ownerOf(labelhash)`, lower-case. `None` when the call reverts
    /// (unregistered or expired names).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] on RPC failure.
    async fn owner_of(&self, label: &str) -> Result<Option<String>, GatewayError>;

    /// `(minCommitmentAge, maxCommitmentAge)` in seconds.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Upstream`] on RPC failure.
    async fn commitment_age_bounds(&self) -> Result<(i64, i64), GatewayError>;
}

/// Reads expiry and owner for `label`.
///
/// # Errors
///
/// Propagates [`GatewayError::Upstream`] from either read.
pub async fn ownership_check(
    chain: &dyn ChainClient,
    label: &str,
) -> Result<OwnershipCheck, GatewayError> {
    let expires = chain.name_expires(label).await?;
    let expires_at = if expires == 0 {
        None
    } else {
        Some(chain_timestamp(expires)?)
    };
    let owner = chain.owner_of(label).await?;
    Ok(OwnershipCheck { expires_at, owner })
}
