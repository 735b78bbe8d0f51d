use std::sync::Arc;

use intentmesh_core::{GeoPoint, Intention, MeshError, MeshResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;
/// Golden ratio used for card sizing.
pub const GOLDEN_RATIO: f64 = 1.618;

/// Tunables for [`Ranker::rank`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankOptions {
    /// Caller location. Geo scoring only applies when this is set.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_geo_weight")]
    pub geo_weight: f64,
    /// Distance at which the geo score reaches zero.
    #[serde(default = "default_max_distance_km")]
    pub max_distance_km: f64,
    /// Results scoring below this are dropped.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Card width at `display_scale == 1.0`.
    #[serde(default = "default_base_width")]
    pub base_width: f64,
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_geo_weight() -> f64 {
    0.3
}
fn default_max_distance_km() -> f64 {
    100.0
}
fn default_min_score() -> f64 {
    0.1
}
fn default_max_results() -> usize {
    50
}
fn default_base_width() -> f64 {
    320.0
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            location: None,
            semantic_weight: default_semantic_weight(),
            geo_weight: default_geo_weight(),
            max_distance_km: default_max_distance_km(),
            min_score: default_min_score(),
            max_results: default_max_results(),
            base_width: default_base_width(),
        }
    }
}

impl RankOptions {
    /// Rank relative to a caller location.
    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// Presentation hint carried alongside a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplayHint {
    /// In `[0.5, 1.0]`.
    pub scale: f64,
    pub width: f64,
    pub height: f64,
}

/// An intention with its scores for one query. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RankedResult {
    pub intention: Intention,
    pub semantic_score: f64,
    pub geo_score: f64,
    /// In `[0, 1]`.
    pub combined_score: f64,
    pub display: DisplayHint,
}

/// Cosine similarity between two vectors.
///
/// Fails on a length mismatch. If either vector has zero norm the
/// similarity is defined as `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> MeshResult<f32> {
    if a.len() != b.len() {
        return Err(MeshError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        Ok(0.0)
    } else {
        Ok(dot / (na * nb))
    }
}

/// Haversine great-circle distance in kilometers; infinite if either point is absent.
pub fn geo_distance_km(p1: Option<GeoPoint>, p2: Option<GeoPoint>) -> f64 {
    let (Some(p1), Some(p2)) = (p1, p2) else {
        return f64::INFINITY;
    };
    let d_lat = (p2.lat - p1.lat).to_radians();
    let d_lon = (p2.lon - p1.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + p1.lat.to_radians().cos() * p2.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Linear proximity score: 1 at distance 0, 0 at or beyond `max_distance_km`.
pub fn geo_score(distance_km: f64, max_distance_km: f64) -> f64 {
    if !distance_km.is_finite() || max_distance_km <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_km / max_distance_km).clamp(0.0, 1.0)
}

/// Map a combined score to a card size. `height = round(width / φ)`.
pub fn display_hint(combined_score: f64, base_width: f64) -> DisplayHint {
    let scale = 0.5 + combined_score.clamp(0.0, 1.0) * 0.5;
    let width = (base_width * scale).round();
    let height = (width / GOLDEN_RATIO).round();
    DisplayHint {
        scale,
        width,
        height,
    }
}

/// Scores intentions against a free-text query by semantic similarity,
/// blended with geographic proximity when both sides have a location.
pub struct Ranker {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Ranker {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// The embedder this ranker uses for queries.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Rank `items` against `query`.
    ///
    /// Items without an embedding, or whose embedding does not match the
    /// query's dimensionality, are excluded and logged.
    pub async fn rank(
        &self,
        query: &str,
        items: &[Intention],
        opts: &RankOptions,
    ) -> MeshResult<Vec<RankedResult>> {
        let query_vec = self.embedder.embed(query).await?;

        let mut results: Vec<RankedResult> = items
            .iter()
            .filter_map(|item| score_item(&query_vec, item, opts))
            .filter(|r| r.combined_score >= opts.min_score)
            .collect();

        results.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(opts.max_results);

        debug!(
            query = %query,
            candidates = items.len(),
            returned = results.len(),
            "ranked intentions"
        );
        Ok(results)
    }
}

fn score_item(query_vec: &[f32], item: &Intention, opts: &RankOptions) -> Option<RankedResult> {
    let Some(embedding) = item.embedding.as_deref() else {
        warn!(id = %item.id, "intention has no embedding, excluded from ranking");
        return None;
    };
    let semantic = match cosine_similarity(query_vec, embedding) {
        Ok(s) => s as f64,
        Err(e) => {
            warn!(id = %item.id, error = %e, "intention embedding unusable, excluded from ranking");
            return None;
        }
    };

    let has_geo_context = opts.location.is_some() && item.geo.is_some();
    let geo = if has_geo_context {
        geo_score(geo_distance_km(opts.location, item.geo), opts.max_distance_km)
    } else {
        0.0
    };

    let combined = if has_geo_context {
        semantic * opts.semantic_weight + geo * opts.geo_weight
    } else {
        semantic
    }
    .clamp(0.0, 1.0);

    Some(RankedResult {
        intention: item.clone(),
        semantic_score: semantic,
        geo_score: geo,
        combined_score: combined,
        display: display_hint(combined, opts.base_width),
    })
}
