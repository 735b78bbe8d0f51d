//! Join orchestration.
//!
//! Establishes exactly one store session, trying in order: the invitation
//! carried by the link, the address remembered from a previous session, and
//! finally a brand-new store. Every step races a fixed deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use intentmesh_core::{MeshError, MeshResult};
use intentmesh_security::{AuditLog, AuditOutcome};
use intentmesh_session::LocalState;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deadline::with_deadline;
use crate::invitation::{Invitation, LinkContext};
use crate::store::{OpenOptions, ReplicatedStore, StoreEvent, StoreSession};
use crate::transport::PeerTransport;

/// Progress of the current join run, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinState {
    /// No join has run yet.
    Idle,
    /// Reading the invitation out of the link.
    ParsingInvitation,
    /// Dialing the invitation's peer hints.
    DirectDialing,
    /// Opening the invited store through ambient discovery.
    BootstrapDiscovery,
    /// Reopening the address remembered from the last session.
    OpeningRemembered,
    /// Creating a fresh store.
    CreatingNew,
    /// A session is live.
    Opened,
    /// The last run ended in an error.
    Failed,
}

/// Which path produced the session. Exactly one is set per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinOrigin {
    /// Opened from an invitation link.
    Invitation,
    /// Reopened from the remembered address.
    Remembered,
    /// A store created by this device.
    CreatedNew,
}

/// A successfully opened session and how it was reached.
#[derive(Clone)]
pub struct JoinOutcome {
    /// The open store session.
    pub session: Arc<dyn StoreSession>,
    /// The path that reached it.
    pub origin: JoinOrigin,
    /// Whether at least one invitation peer hint was dialed successfully.
    pub direct_peer_connected: bool,
    /// Address of the opened store.
    pub address: String,
}

impl JoinOutcome {
    /// A freshly created store cannot hold data yet, so the initial read can be skipped.
    pub fn is_new_session(&self) -> bool {
        self.origin == JoinOrigin::CreatedNew
    }
}

impl std::fmt::Debug for JoinOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinOutcome")
            .field("origin", &self.origin)
            .field("direct_peer_connected", &self.direct_peer_connected)
            .field("address", &self.address)
            .finish()
    }
}

/// Deadlines for each join step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTimeouts {
    /// Per peer hint.
    pub dial: Duration,
    /// Pause after a successful direct dial.
    pub stabilize: Duration,
    /// Opening the invited store once a peer is connected.
    pub open_after_dial: Duration,
    /// Opening the invited store with no peer connected.
    pub open_via_discovery: Duration,
    /// Reopening the remembered address.
    pub open_remembered: Duration,
    /// Creating a new store.
    pub create_store: Duration,
}

impl Default for JoinTimeouts {
    fn default() -> Self {
        Self {
            dial: Duration::from_secs(10),
            stabilize: Duration::from_secs(1),
            open_after_dial: Duration::from_secs(30),
            open_via_discovery: Duration::from_secs(90),
            open_remembered: Duration::from_secs(30),
            create_store: Duration::from_secs(15),
        }
    }
}

/// Clears the in-flight flag when a join run ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs the join protocol and owns the resulting session.
pub struct JoinOrchestrator {
    store: Arc<dyn ReplicatedStore>,
    transport: Arc<dyn PeerTransport>,
    state: Arc<LocalState>,
    audit: Arc<AuditLog>,
    store_name: String,
    timeouts: JoinTimeouts,
    in_flight: AtomicBool,
    join_state: watch::Sender<JoinState>,
    current: RwLock<Option<JoinOutcome>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl JoinOrchestrator {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        transport: Arc<dyn PeerTransport>,
        state: Arc<LocalState>,
        store_name: impl Into<String>,
    ) -> Self {
        let (join_state, _) = watch::channel(JoinState::Idle);
        Self {
            store,
            transport,
            state,
            audit: Arc::new(AuditLog::disabled()),
            store_name: store_name.into(),
            timeouts: JoinTimeouts::default(),
            in_flight: AtomicBool::new(false),
            join_state,
            current: RwLock::new(None),
            event_task: Mutex::new(None),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_timeouts(mut self, timeouts: JoinTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn state(&self) -> JoinState {
        *self.join_state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<JoinState> {
        self.join_state.subscribe()
    }

    /// The session from the last successful join.
    pub fn current_session(&self) -> Option<JoinOutcome> {
        self.current.read().clone()
    }

    fn set_state(&self, next: JoinState) {
        debug!(state = ?next, "join state");
        self.join_state.send_replace(next);
    }

    /// Establish a session.
    ///
    /// Rejects with [`MeshError::JoinInProgress`] while another run is active.
    /// A failed invitation is fatal: the remembered address is not tried.
    pub async fn join(&self, link: Option<&LinkContext>) -> MeshResult<JoinOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("join requested while another join is running");
            return Err(MeshError::JoinInProgress);
        }
        let _guard = InFlight(&self.in_flight);

        let result = self.run(link).await;
        match &result {
            Ok(outcome) => {
                self.install(outcome.clone()).await;
                self.set_state(JoinState::Opened);
                info!(
                    address = %outcome.address,
                    origin = ?outcome.origin,
                    direct_peer_connected = outcome.direct_peer_connected,
                    "joined store"
                );
                self.audit.log_action(
                    "join",
                    Some(outcome.address.clone()),
                    json!({
                        "origin": outcome.origin,
                        "directPeerConnected": outcome.direct_peer_connected,
                    }),
                    AuditOutcome::Success,
                );
            }
            Err(e) => {
                self.set_state(JoinState::Failed);
                warn!(error = %e, "join failed");
                self.audit.log_action(
                    "join",
                    None,
                    json!({ "error": e.to_string() }),
                    AuditOutcome::Failure,
                );
            }
        }
        result
    }

    async fn run(&self, link: Option<&LinkContext>) -> MeshResult<JoinOutcome> {
        if let Some(link) = link {
            self.set_state(JoinState::ParsingInvitation);
            if let Some(invitation) = link.invitation() {
                let result = self.join_invitation(&invitation).await;
                // Discarded either way so a reload cannot retrigger it.
                link.clear_invitation();
                return result;
            }
        }

        if let Some(address) = self.state.remembered_address().await {
            self.set_state(JoinState::OpeningRemembered);
            match self
                .open_existing(&address, self.timeouts.open_remembered)
                .await
            {
                Ok(session) => {
                    return Ok(JoinOutcome {
                        address: session.address(),
                        session,
                        origin: JoinOrigin::Remembered,
                        direct_peer_connected: false,
                    });
                }
                Err(e) => {
                    warn!(address = %address, error = %e, "remembered store unavailable, forgetting it");
                    self.audit.log_action(
                        "open_remembered",
                        Some(address.clone()),
                        json!({ "error": e.to_string() }),
                        AuditOutcome::Degraded,
                    );
                    if let Err(e) = self.state.forget_address().await {
                        warn!(error = %e, "could not forget remembered address");
                    }
                }
            }
        }

        self.create_new().await
    }

    async fn join_invitation(&self, invitation: &Invitation) -> MeshResult<JoinOutcome> {
        info!(
            address = %invitation.address,
            peers = invitation.peers.len(),
            "joining via invitation"
        );

        let direct_peer_connected = if invitation.peers.is_empty() {
            false
        } else {
            self.set_state(JoinState::DirectDialing);
            self.dial_hints(&invitation.peers).await
        };

        let deadline = if direct_peer_connected {
            tokio::time::sleep(self.timeouts.stabilize).await;
            self.timeouts.open_after_dial
        } else {
            self.set_state(JoinState::BootstrapDiscovery);
            self.timeouts.open_via_discovery
        };

        match self.open_existing(&invitation.address, deadline).await {
            Ok(session) => {
                if let Err(e) = self.state.remember_address(&invitation.address).await {
                    warn!(error = %e, "could not remember invited store address");
                }
                Ok(JoinOutcome {
                    address: invitation.address.clone(),
                    session,
                    origin: JoinOrigin::Invitation,
                    direct_peer_connected,
                })
            }
            Err(e) if direct_peer_connected => Err(MeshError::PeerUnreachable(format!(
                "connected to the inviting peer but could not open {}: {e}",
                invitation.address
            ))),
            Err(e) => Err(MeshError::DiscoveryTimeout(format!(
                "could not find peers serving {}: {e}",
                invitation.address
            ))),
        }
    }

    /// Dial every hint concurrently and wait for all of them to settle.
    async fn dial_hints(&self, peers: &[String]) -> bool {
        let attempts = peers.iter().map(|peer| {
            let transport = Arc::clone(&self.transport);
            let peer = peer.clone();
            let deadline = self.timeouts.dial;
            async move {
                let target = peer.clone();
                let result = with_deadline("dial", deadline, async move {
                    transport.dial(&target).await
                })
                .await;
                (peer, result)
            }
        });

        let mut connected = 0usize;
        for (peer, result) in join_all(attempts).await {
            match result {
                Ok(conn) => {
                    connected += 1;
                    debug!(peer = %conn.remote, "direct dial succeeded");
                }
                Err(e) => debug!(%peer, error = %e, "direct dial failed"),
            }
        }
        info!(attempted = peers.len(), connected, "direct dialing finished");
        connected > 0
    }

    async fn open_existing(
        &self,
        address: &str,
        deadline: Duration,
    ) -> MeshResult<Arc<dyn StoreSession>> {
        let store = Arc::clone(&self.store);
        let target = address.to_string();
        with_deadline("open store", deadline, async move {
            store.open(&target, OpenOptions::existing()).await
        })
        .await
    }

    async fn create_new(&self) -> MeshResult<JoinOutcome> {
        self.set_state(JoinState::CreatingNew);
        let store = Arc::clone(&self.store);
        let name = self.store_name.clone();
        let session = with_deadline("create store", self.timeouts.create_store, async move {
            store.open(&name, OpenOptions::create_open_write()).await
        })
        .await?;

        let address = session.address();
        info!(address = %address, "created new store");
        if let Err(e) = self.state.remember_address(&address).await {
            warn!(error = %e, "could not remember new store address");
        }
        Ok(JoinOutcome {
            address,
            session,
            origin: JoinOrigin::CreatedNew,
            direct_peer_connected: false,
        })
    }

    /// Make `outcome` the live session, closing any previous one.
    async fn install(&self, outcome: JoinOutcome) {
        let previous = self.current.write().replace(outcome.clone());
        if let Some(previous) = previous {
            if let Err(e) = previous.session.close().await {
                warn!(error = %e, "closing previous session failed");
            }
        }

        let task = spawn_event_logger(outcome.session.subscribe(), outcome.address);
        if let Some(old) = self.event_task.lock().replace(task) {
            old.abort();
        }
    }
}

impl Drop for JoinOrchestrator {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.lock().take() {
            task.abort();
        }
    }
}

fn spawn_event_logger(mut rx: broadcast::Receiver<StoreEvent>, address: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(StoreEvent::Join { peer }) => info!(%address, %peer, "peer joined store"),
                Ok(StoreEvent::Update { entry }) => {
                    debug!(%address, id = %entry.id, "store updated");
                }
                Ok(StoreEvent::Error { message }) => warn!(%address, %message, "store error"),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(%address, missed, "store event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
