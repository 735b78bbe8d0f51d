use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intentmesh_core::MeshResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// An established direct connection to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConnection {
    /// The dialed address.
    pub remote: String,
    /// When the connection came up.
    pub established_at: DateTime<Utc>,
}

/// Connection and discovery notifications from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { peer: String },
    Disconnected { peer: String },
    Discovered { peer: String },
}

/// The peer-to-peer transport substrate.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Open a direct connection to `address`.
    async fn dial(&self, address: &str) -> MeshResult<PeerConnection>;

    /// Addresses other peers can dial this node on.
    fn listen_addresses(&self) -> Vec<String>;

    /// A fresh subscription to transport events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

/// Drains transport events into the log and keeps a live connection count.
pub struct TransportMonitor {
    connected: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TransportMonitor {
    /// Start monitoring `transport`. Must be called within a tokio runtime.
    pub fn spawn(transport: &dyn PeerTransport) -> Self {
        let mut rx = transport.events();
        let connected = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connected);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TransportEvent::Connected { peer }) => {
                        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        info!(%peer, connected = n, "peer connected");
                    }
                    Ok(TransportEvent::Disconnected { peer }) => {
                        let n = counter
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| {
                                Some(c.saturating_sub(1))
                            })
                            .map(|prev| prev.saturating_sub(1))
                            .unwrap_or(0);
                        info!(%peer, connected = n, "peer disconnected");
                    }
                    Ok(TransportEvent::Discovered { peer }) => {
                        debug!(%peer, "peer discovered");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "transport monitor lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { connected, task }
    }

    /// Peers currently connected, as seen through events.
    pub fn connected_peers(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TransportMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
