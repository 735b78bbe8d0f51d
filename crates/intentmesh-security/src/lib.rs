//! Security primitives for intentmesh.
//!
//! # Main types
//!
//! - [`HmacSigner`] - Local implementation of the signing capability.
//! - [`Sanitizer`] - Strips control characters from user text.
//! - [`AuditLog`] - Append-only diagnostics trail persisted to disk.

/// Diagnostics audit logging.
pub mod audit;
/// Input sanitization utilities.
pub mod sanitizer;
/// HMAC-SHA256 signer.
pub mod signer;

pub use audit::{AuditEntry, AuditLog, AuditOutcome};
pub use sanitizer::{SanitizeResult, Sanitizer};
pub use signer::HmacSigner;
