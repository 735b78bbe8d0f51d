//! Core types and error definitions for intentmesh.
//!
//! This crate provides the foundational types shared across all intentmesh
//! crates: the error enum, the [`Intention`] data model with its validation
//! rules, ID generation, and the signing/verification capability traits.
//!
//! # Main types
//!
//! - [`MeshError`] - Unified error enum for all subsystems.
//! - [`MeshResult`] - Convenience alias for `Result<T, MeshError>`.
//! - [`Intention`] - The unit of shared data.
//! - [`NewIntention`] / [`IntentionPatch`] - Create and update inputs.
//! - [`Signer`] / [`UpdateVerifier`] - Capabilities supplied by the host.

/// Signing and verification capabilities.
pub mod capability;
/// Error types.
pub mod error;
/// Intention ID generation.
pub mod id;
/// The intention data model.
pub mod intention;

pub use capability::{AcceptAll, Signer, UpdateVerifier};
pub use error::{MeshError, MeshResult};
pub use id::generate_id;
pub use intention::{
    embedding_text, GeoPoint, Intention, IntentionPatch, IntentionStatus, NewIntention,
    EMBEDDING_DIM, MAX_DESCRIPTION_CHARS, MAX_TITLE_CHARS,
};
