//! Joining, reading and writing the shared intention store.
//!
//! # Main types
//!
//! - [`JoinOrchestrator`] - Invitation, remembered address, or new store, in that order.
//! - [`WritePipeline`] - Cache-first writes, cache-fallback reads.
//! - [`ReplicatedStore`] / [`StoreSession`] - Contract for the external store.
//! - [`PeerTransport`] - Contract for the external transport.
//! - [`Invitation`] / [`LinkContext`] - Shareable links carrying a store address.
//! - [`LoopbackMesh`] - In-process store and transport for tests and demos.

/// Racing operations against deadlines.
pub mod deadline;
/// Invitation links.
pub mod invitation;
/// Join orchestration.
pub mod join;
/// In-process mesh.
pub mod loopback;
/// Write pipeline.
pub mod pipeline;
/// Replicated store contract.
pub mod store;
/// Peer transport contract and monitor.
pub mod transport;
/// Update verification ledger.
pub mod verification;

pub use deadline::{race, with_deadline, Raced};
pub use invitation::{strip_invitation_params, Invitation, LinkContext};
pub use join::{JoinOrchestrator, JoinOrigin, JoinOutcome, JoinState, JoinTimeouts};
pub use loopback::{LoopbackMesh, LoopbackNode, NodeFaults};
pub use pipeline::{PipelineTimeouts, WritePipeline};
pub use store::{AccessPolicy, OpenOptions, ReplicatedStore, StoreEvent, StoreSession};
pub use transport::{PeerConnection, PeerTransport, TransportEvent, TransportMonitor};
pub use verification::{VerificationLedger, VerificationRecord, VerificationStatus};
