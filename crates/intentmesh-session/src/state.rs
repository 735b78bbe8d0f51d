use std::path::PathBuf;

use chrono::{DateTime, Utc};
use intentmesh_core::MeshResult;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::persist::{read_json, write_json_atomic};

/// Maximum number of attention events retained.
pub const ATTENTION_LOG_CAPACITY: usize = 50;

/// A signed record of the user switching focus between intentions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttentionEvent {
    pub id: Uuid,
    pub from: Option<String>,
    pub to: Option<String>,
    pub at: DateTime<Utc>,
    /// Identity that signed the event.
    pub signer: String,
    pub signature: String,
}

/// On-disk layout. Field names are the persisted keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(rename = "intentmesh.dbAddress", default)]
    remembered_address: Option<String>,
    #[serde(rename = "intentmesh.credential", default)]
    credential: Option<String>,
    #[serde(rename = "intentmesh.activeIntention", default)]
    active_intention: Option<String>,
    #[serde(rename = "intentmesh.attentionLog", default)]
    attention_log: Vec<AttentionEvent>,
}

/// Small per-device key-value state that survives restarts: the remembered
/// store address, a cached credential, the active intention and the
/// attention log.
///
/// Without a path the state lives in memory only.
pub struct LocalState {
    path: Option<PathBuf>,
    state: RwLock<PersistedState>,
}

impl LocalState {
    /// Memory-only state.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(PersistedState::default()),
        }
    }

    /// Open state persisted at `path`. An unreadable file is treated as empty.
    pub async fn open(path: PathBuf) -> MeshResult<Self> {
        let state = match read_json::<PersistedState>(&path).await {
            Ok(Some(s)) => s,
            Ok(None) => PersistedState::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding unreadable local state");
                PersistedState::default()
            }
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
        })
    }

    async fn mutate<F>(&self, f: F) -> MeshResult<()>
    where
        F: FnOnce(&mut PersistedState),
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        f(&mut next);
        if let Some(path) = &self.path {
            write_json_atomic(path, &next).await?;
        }
        *guard = next;
        Ok(())
    }

    /// Address of the store joined in a previous session.
    pub async fn remembered_address(&self) -> Option<String> {
        self.state.read().await.remembered_address.clone()
    }

    pub async fn remember_address(&self, address: &str) -> MeshResult<()> {
        info!(address = %address, "remembering store address");
        let address = address.to_string();
        self.mutate(|s| s.remembered_address = Some(address)).await
    }

    pub async fn forget_address(&self) -> MeshResult<()> {
        self.mutate(|s| s.remembered_address = None).await
    }

    /// Cached serialized authentication credential, opaque to this crate.
    pub async fn credential(&self) -> Option<String> {
        self.state.read().await.credential.clone()
    }

    pub async fn set_credential(&self, credential: Option<String>) -> MeshResult<()> {
        self.mutate(|s| s.credential = credential).await
    }

    pub async fn active_intention(&self) -> Option<String> {
        self.state.read().await.active_intention.clone()
    }

    pub async fn set_active_intention(&self, id: Option<String>) -> MeshResult<()> {
        self.mutate(|s| s.active_intention = id).await
    }

    /// Attention events, oldest first.
    pub async fn attention_log(&self) -> Vec<AttentionEvent> {
        self.state.read().await.attention_log.clone()
    }

    /// Record a focus switch: set the active intention and append the event,
    /// dropping the oldest entries beyond [`ATTENTION_LOG_CAPACITY`].
    pub async fn record_attention(&self, event: AttentionEvent) -> MeshResult<()> {
        self.mutate(|s| {
            s.active_intention = event.to.clone();
            s.attention_log.push(event);
            let overflow = s.attention_log.len().saturating_sub(ATTENTION_LOG_CAPACITY);
            if overflow > 0 {
                s.attention_log.drain(..overflow);
            }
        })
        .await
    }
}
