use async_trait::async_trait;
use hmac::{Hmac, Mac};
use intentmesh_core::{MeshError, MeshResult, Signer};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Local HMAC-SHA256 signer, used where no hardware authenticator is wired in.
///
/// Signatures are lowercase hex.
pub struct HmacSigner {
    identity: String,
    key: Vec<u8>,
}

impl HmacSigner {
    pub fn new(identity: impl Into<String>, key: impl Into<Vec<u8>>) -> MeshResult<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(MeshError::Signing("signing key must not be empty".into()));
        }
        Ok(Self {
            identity: identity.into(),
            key,
        })
    }

    fn mac(&self) -> MeshResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key).map_err(|e| MeshError::Signing(e.to_string()))
    }

    /// Constant-time check of a hex signature over `payload`.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

#[async_trait]
impl Signer for HmacSigner {
    async fn sign(&self, payload: &[u8]) -> MeshResult<String> {
        let mut mac = self.mac()?;
        mac.update(payload);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}
