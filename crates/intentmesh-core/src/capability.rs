//! Capabilities consumed from outside the core: signing and update verification.

use async_trait::async_trait;

use crate::error::MeshResult;
use crate::intention::Intention;

/// Signs opaque payloads on behalf of the local identity.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Produce a signature for `payload`.
    async fn sign(&self, payload: &[u8]) -> MeshResult<String>;

    /// Identity reference the signatures can be attributed to.
    fn identity(&self) -> &str;
}

/// Decides whether an incoming replicated update is trustworthy.
#[async_trait]
pub trait UpdateVerifier: Send + Sync {
    /// `true` when the update passes verification.
    async fn verify(&self, update: &Intention) -> bool;
}

/// Verifier that accepts every update.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

#[async_trait]
impl UpdateVerifier for AcceptAll {
    async fn verify(&self, _update: &Intention) -> bool {
        true
    }
}
