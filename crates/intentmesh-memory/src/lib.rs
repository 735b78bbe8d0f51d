//! Embeddings and hybrid ranking for intentions.
//!
//! Turns free text into fixed-length vectors and combines semantic similarity
//! with geographic proximity into one score, mapped to a display-size hint.
//!
//! # Main types
//!
//! - [`EmbeddingProvider`] - Trait for the embedding capability.
//! - [`LocalEmbedding`] - Deterministic hashing embedder, 384 dimensions.
//! - [`Ranker`] - Scores, filters, sorts and sizes query results.
//! - [`RankOptions`] - Weights, thresholds and card sizing.

/// Embedding provider trait and local implementation.
pub mod embedding;
/// Similarity, distance and ranking.
pub mod ranking;

pub use embedding::{EmbeddingProvider, LocalEmbedding, TITLE_WEIGHT};
pub use ranking::{
    cosine_similarity, display_hint, geo_distance_km, geo_score, DisplayHint, RankOptions,
    RankedResult, Ranker, EARTH_RADIUS_KM, GOLDEN_RATIO,
};
