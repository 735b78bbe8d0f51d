use std::sync::Arc;

use async_trait::async_trait;
use intentmesh_core::{Intention, MeshResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Who may write to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Every participant may write.
    OpenWrite,
    /// Only the listed identities may write.
    Restricted(Vec<String>),
}

/// Options for [`ReplicatedStore::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Create the store if `target` names a store that does not exist yet.
    pub create: bool,
    /// Record field used as the document key.
    pub index_field: String,
    /// Write access granted when creating.
    pub access: AccessPolicy,
}

impl OpenOptions {
    /// Open an existing store by address.
    pub fn existing() -> Self {
        Self {
            create: false,
            index_field: "id".to_string(),
            access: AccessPolicy::OpenWrite,
        }
    }

    /// Create a new store writable by every participant.
    pub fn create_open_write() -> Self {
        Self {
            create: true,
            ..Self::existing()
        }
    }
}

/// Events emitted by an open store session.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A peer joined the store.
    Join { peer: String },
    /// A record was written, locally or by a replicating peer.
    Update { entry: Intention },
    /// The store reported a problem.
    Error { message: String },
}

/// An external append/merge replicated document store.
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    /// Open the store at `target`: an address, or a name when `opts.create` is set.
    async fn open(&self, target: &str, opts: OpenOptions) -> MeshResult<Arc<dyn StoreSession>>;
}

/// One open handle on a replicated store.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Address other participants can open this store by.
    fn address(&self) -> String;

    async fn all(&self) -> MeshResult<Vec<Intention>>;

    async fn get(&self, id: &str) -> MeshResult<Option<Intention>>;

    async fn put(&self, record: Intention) -> MeshResult<()>;

    async fn del(&self, id: &str) -> MeshResult<()>;

    /// A fresh subscription to this session's events.
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    async fn close(&self) -> MeshResult<()> {
        Ok(())
    }
}
