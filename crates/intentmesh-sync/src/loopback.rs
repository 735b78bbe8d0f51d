//! In-process mesh: replicated stores and a peer transport for tests and demos.
//!
//! Every node created from one [`LoopbackMesh`] shares the same stores, so
//! replication is immediate. Reachability is still modelled: a node can only
//! open an existing store it already hosts, or one hosted by an online peer
//! it is connected to (or any online host when ambient discovery is on).
//! Opening an unreachable store waits until it becomes reachable, like a
//! real discovery lookup would.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use intentmesh_core::{Intention, MeshError, MeshResult};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::store::{OpenOptions, ReplicatedStore, StoreEvent, StoreSession};
use crate::transport::{PeerConnection, PeerTransport, TransportEvent};

const LISTEN_PREFIX: &str = "/loopback/p2p/";
const EVENT_CAPACITY: usize = 256;
const DISCOVERY_POLL: Duration = Duration::from_millis(250);

/// Injected misbehaviour for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFaults {
    /// Added before every put and delete.
    pub write_delay: Option<Duration>,
    /// Added before every read.
    pub read_delay: Option<Duration>,
    /// Added before every open.
    pub open_delay: Option<Duration>,
    /// Added before every dial.
    pub dial_delay: Option<Duration>,
    /// Puts and deletes fail.
    pub fail_writes: bool,
    /// Reads fail.
    pub fail_reads: bool,
    /// Opens never complete.
    pub stall_open: bool,
}

struct LoopbackStore {
    address: String,
    records: RwLock<Vec<Intention>>,
    events: broadcast::Sender<StoreEvent>,
    hosts: Mutex<HashSet<String>>,
}

struct NodeShared {
    name: String,
    online: AtomicBool,
    faults: Mutex<NodeFaults>,
    connected: Mutex<HashSet<String>>,
    events: broadcast::Sender<TransportEvent>,
}

#[derive(Default)]
struct MeshInner {
    stores: Mutex<HashMap<String, Arc<LoopbackStore>>>,
    nodes: Mutex<HashMap<String, Arc<NodeShared>>>,
    ambient_discovery: AtomicBool,
    created: AtomicU64,
}

impl MeshInner {
    fn is_online(&self, name: &str) -> bool {
        self.nodes
            .lock()
            .get(name)
            .is_some_and(|n| n.online.load(Ordering::SeqCst))
    }

    fn reachable(&self, store: &LoopbackStore, node: &NodeShared) -> bool {
        let hosts: Vec<String> = store.hosts.lock().iter().cloned().collect();
        if hosts.iter().any(|h| *h == node.name) {
            return true;
        }
        let ambient = self.ambient_discovery.load(Ordering::SeqCst);
        let connected = node.connected.lock().clone();
        hosts
            .iter()
            .filter(|h| ambient || connected.contains(*h))
            .any(|h| self.is_online(h))
    }
}

/// Hub all loopback nodes attach to.
#[derive(Clone, Default)]
pub struct LoopbackMesh {
    inner: Arc<MeshInner>,
}

impl LoopbackMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let nodes find stores through any online host, not only connected ones.
    pub fn set_ambient_discovery(&self, enabled: bool) {
        self.inner.ambient_discovery.store(enabled, Ordering::SeqCst);
    }

    /// The node called `name`, created online on first use.
    pub fn node(&self, name: &str) -> LoopbackNode {
        let shared = {
            let mut nodes = self.inner.nodes.lock();
            Arc::clone(nodes.entry(name.to_string()).or_insert_with(|| {
                let (events, _) = broadcast::channel(EVENT_CAPACITY);
                Arc::new(NodeShared {
                    name: name.to_string(),
                    online: AtomicBool::new(true),
                    faults: Mutex::new(NodeFaults::default()),
                    connected: Mutex::new(HashSet::new()),
                    events,
                })
            }))
        };
        LoopbackNode {
            mesh: Arc::clone(&self.inner),
            shared,
        }
    }

    /// Number of stores ever created on this mesh.
    pub fn store_count(&self) -> usize {
        self.inner.stores.lock().len()
    }
}

/// One participant: both its store client and its transport.
#[derive(Clone)]
pub struct LoopbackNode {
    mesh: Arc<MeshInner>,
    shared: Arc<NodeShared>,
}

impl LoopbackNode {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The address peers dial this node on.
    pub fn listen_address(&self) -> String {
        format!("{LISTEN_PREFIX}{}", self.shared.name)
    }

    /// Take the node offline or bring it back. Going offline drops its connections.
    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
        if !online {
            let peers: Vec<String> = self.shared.connected.lock().drain().collect();
            for peer in peers {
                let _ = self.shared.events.send(TransportEvent::Disconnected { peer: peer.clone() });
                if let Some(other) = self.mesh.nodes.lock().get(&peer) {
                    other.connected.lock().remove(&self.shared.name);
                    let _ = other.events.send(TransportEvent::Disconnected {
                        peer: self.shared.name.clone(),
                    });
                }
            }
        }
    }

    pub fn set_faults(&self, faults: NodeFaults) {
        *self.shared.faults.lock() = faults;
    }

    fn faults(&self) -> NodeFaults {
        self.shared.faults.lock().clone()
    }

    fn session(&self, store: Arc<LoopbackStore>) -> Arc<dyn StoreSession> {
        Arc::new(LoopbackSession {
            store,
            node: Arc::clone(&self.shared),
        })
    }
}

async fn delay(d: Option<Duration>) {
    if let Some(d) = d {
        tokio::time::sleep(d).await;
    }
}

#[async_trait]
impl ReplicatedStore for LoopbackNode {
    async fn open(&self, target: &str, opts: OpenOptions) -> MeshResult<Arc<dyn StoreSession>> {
        let faults = self.faults();
        delay(faults.open_delay).await;
        if faults.stall_open {
            std::future::pending::<()>().await;
        }

        if opts.create {
            let n = self.mesh.created.fetch_add(1, Ordering::SeqCst);
            let address = format!("/loopback/store/{target}/{}-{n}", self.shared.name);
            let (events, _) = broadcast::channel(EVENT_CAPACITY);
            let store = Arc::new(LoopbackStore {
                address: address.clone(),
                records: RwLock::new(Vec::new()),
                events,
                hosts: Mutex::new(HashSet::from([self.shared.name.clone()])),
            });
            self.mesh.stores.lock().insert(address.clone(), Arc::clone(&store));
            debug!(node = %self.shared.name, %address, "loopback store created");
            return Ok(self.session(store));
        }

        loop {
            let store = self.mesh.stores.lock().get(target).cloned();
            if let Some(store) = store {
                if self.shared.online.load(Ordering::SeqCst)
                    && self.mesh.reachable(&store, &self.shared)
                {
                    let joined = store.hosts.lock().insert(self.shared.name.clone());
                    if joined {
                        let _ = store.events.send(StoreEvent::Join {
                            peer: self.shared.name.clone(),
                        });
                    }
                    return Ok(self.session(store));
                }
            }
            tokio::time::sleep(DISCOVERY_POLL).await;
        }
    }
}

#[async_trait]
impl PeerTransport for LoopbackNode {
    async fn dial(&self, address: &str) -> MeshResult<PeerConnection> {
        delay(self.faults().dial_delay).await;

        let name = address
            .strip_prefix(LISTEN_PREFIX)
            .ok_or_else(|| MeshError::Transport(format!("unsupported address {address}")))?;
        let peer = self
            .mesh
            .nodes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::Transport(format!("no route to {address}")))?;

        if !self.shared.online.load(Ordering::SeqCst) || !peer.online.load(Ordering::SeqCst) {
            return Err(MeshError::Transport(format!("{address} is offline")));
        }

        let newly_connected = self.shared.connected.lock().insert(peer.name.clone());
        if newly_connected {
            peer.connected.lock().insert(self.shared.name.clone());
            let _ = self.shared.events.send(TransportEvent::Connected {
                peer: peer.name.clone(),
            });
            let _ = peer.events.send(TransportEvent::Connected {
                peer: self.shared.name.clone(),
            });
        }
        Ok(PeerConnection {
            remote: address.to_string(),
            established_at: Utc::now(),
        })
    }

    fn listen_addresses(&self) -> Vec<String> {
        vec![self.listen_address()]
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }
}

struct LoopbackSession {
    store: Arc<LoopbackStore>,
    node: Arc<NodeShared>,
}

impl LoopbackSession {
    fn faults(&self) -> NodeFaults {
        self.node.faults.lock().clone()
    }
}

#[async_trait]
impl StoreSession for LoopbackSession {
    fn address(&self) -> String {
        self.store.address.clone()
    }

    async fn all(&self) -> MeshResult<Vec<Intention>> {
        let faults = self.faults();
        delay(faults.read_delay).await;
        if faults.fail_reads {
            return Err(MeshError::Store("read refused".into()));
        }
        Ok(self.store.records.read().clone())
    }

    async fn get(&self, id: &str) -> MeshResult<Option<Intention>> {
        let faults = self.faults();
        delay(faults.read_delay).await;
        if faults.fail_reads {
            return Err(MeshError::Store("read refused".into()));
        }
        Ok(self.store.records.read().iter().find(|r| r.id == id).cloned())
    }

    async fn put(&self, record: Intention) -> MeshResult<()> {
        let faults = self.faults();
        delay(faults.write_delay).await;
        if faults.fail_writes {
            return Err(MeshError::Store("write refused".into()));
        }
        {
            let mut records = self.store.records.write();
            match records.iter_mut().find(|r| r.id == record.id) {
                Some(slot) => *slot = record.clone(),
                None => records.push(record.clone()),
            }
        }
        let _ = self.store.events.send(StoreEvent::Update { entry: record });
        Ok(())
    }

    async fn del(&self, id: &str) -> MeshResult<()> {
        let faults = self.faults();
        delay(faults.write_delay).await;
        if faults.fail_writes {
            return Err(MeshError::Store("write refused".into()));
        }
        self.store.records.write().retain(|r| r.id != id);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.events.subscribe()
    }
}
