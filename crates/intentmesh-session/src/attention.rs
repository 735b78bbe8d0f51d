use std::sync::Arc;

use chrono::Utc;
use intentmesh_core::{MeshResult, Signer};
use tracing::info;
use uuid::Uuid;

use crate::state::{AttentionEvent, LocalState};

/// Records which intention the user is focused on, as signed audit events.
pub struct AttentionTracker {
    state: Arc<LocalState>,
    signer: Arc<dyn Signer>,
}

impl AttentionTracker {
    pub fn new(state: Arc<LocalState>, signer: Arc<dyn Signer>) -> Self {
        Self { state, signer }
    }

    /// Switch focus to `to` (or to nothing), signing and logging the switch.
    pub async fn switch_to(&self, to: Option<&str>) -> MeshResult<AttentionEvent> {
        let from = self.state.active_intention().await;
        let at = Utc::now();
        let payload = serde_json::json!({
            "from": from,
            "to": to,
            "at": at,
        });
        let signature = self.signer.sign(payload.to_string().as_bytes()).await?;

        let event = AttentionEvent {
            id: Uuid::new_v4(),
            from,
            to: to.map(str::to_string),
            at,
            signer: self.signer.identity().to_string(),
            signature,
        };
        self.state.record_attention(event.clone()).await?;
        info!(from = ?event.from, to = ?event.to, "attention switched");
        Ok(event)
    }

    /// The payload bytes that were signed for `event`.
    pub fn signed_payload(event: &AttentionEvent) -> Vec<u8> {
        serde_json::json!({
            "from": event.from,
            "to": event.to,
            "at": event.at,
        })
        .to_string()
        .into_bytes()
    }
}
