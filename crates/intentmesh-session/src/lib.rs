//! Local, per-device persistence for intentmesh.
//!
//! # Main types
//!
//! - [`LocalCache`] - Snapshot mirror of the replicated store.
//! - [`FileLocalCache`] / [`InMemoryLocalCache`] - Cache backends.
//! - [`LocalState`] - Remembered store address, credential, active intention.
//! - [`AttentionTracker`] - Signed, bounded log of focus switches.

/// Signed attention-switch events.
pub mod attention;
/// Snapshot cache of intentions.
pub mod cache;
mod persist;
/// Persisted per-device state.
pub mod state;

pub use attention::AttentionTracker;
pub use cache::{FileLocalCache, InMemoryLocalCache, LocalCache};
pub use state::{AttentionEvent, LocalState, ATTENTION_LOG_CAPACITY};
