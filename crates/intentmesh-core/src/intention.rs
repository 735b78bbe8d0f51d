use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};

/// Maximum title length, in characters.
pub const MAX_TITLE_CHARS: usize = 200;
/// Maximum description length, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 2000;
/// Dimensionality of every intention embedding.
pub const EMBEDDING_DIM: usize = 384;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub lat: f64,
    /// Longitude in degrees, positive east.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude.
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Lifecycle status of an intention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentionStatus {
    /// Open and visible in search.
    #[default]
    Active,
    /// Fulfilled by someone.
    Completed,
    /// Withdrawn by its author.
    Archived,
}

/// The unit of shared data.
///
/// Once committed, the replicated store owns the authoritative copy. Copies in
/// the local cache may be stale and are never used for conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intention {
    /// Process-unique identifier, immutable once created.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub category: String,
    /// Human-readable location label.
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
    #[serde(default)]
    pub status: IntentionStatus,
    /// Reference to the author identity. Never owned by the intention.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived_at: Option<DateTime<Utc>>,
    /// Derived from title + description; always [`EMBEDDING_DIM`] long when present.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub embedded_at: Option<DateTime<Utc>>,
}

impl Intention {
    /// The text the embedding is computed from.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.description)
    }

    /// Attach a freshly computed embedding, checking its dimensionality.
    pub fn set_embedding(&mut self, embedding: Vec<f32>, at: DateTime<Utc>) -> MeshResult<()> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(MeshError::DimensionMismatch {
                expected: EMBEDDING_DIM,
                actual: embedding.len(),
            });
        }
        self.embedding = Some(embedding);
        self.embedded_at = Some(at);
        Ok(())
    }

    /// Merge a patch into this intention and bump `updated_at`.
    ///
    /// Returns `true` when title or description changed, meaning the
    /// embedding is now stale and must be regenerated.
    pub fn apply_patch(&mut self, patch: IntentionPatch, now: DateTime<Utc>) -> bool {
        let mut text_changed = false;

        if let Some(title) = patch.title {
            if title != self.title {
                self.title = title;
                text_changed = true;
            }
        }
        if let Some(description) = patch.description {
            if description != self.description {
                self.description = description;
                text_changed = true;
            }
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(location) = patch.location {
            self.location = location;
        }
        if let Some(geo) = patch.geo {
            self.geo = geo;
        }
        if let Some(status) = patch.status {
            self.transition(status, now);
        }

        self.updated_at = now;
        text_changed
    }

    fn transition(&mut self, status: IntentionStatus, now: DateTime<Utc>) {
        if status == self.status {
            return;
        }
        match status {
            IntentionStatus::Active => {
                self.completed_at = None;
                self.archived_at = None;
            }
            IntentionStatus::Completed => self.completed_at = Some(now),
            IntentionStatus::Archived => self.archived_at = Some(now),
        }
        self.status = status;
    }

    /// Check the field-length invariants.
    pub fn validate(&self) -> MeshResult<()> {
        validate_title(&self.title)?;
        validate_description(&self.description)
    }
}

/// Caller-supplied content for a new intention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewIntention {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub geo: Option<GeoPoint>,
    pub created_by: String,
}

impl NewIntention {
    /// Start a draft with just a title and an author reference.
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            created_by: created_by.into(),
            ..Self::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the geo coordinate.
    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Validate and turn the draft into an intention with no embedding yet.
    pub fn into_intention(self, id: String, now: DateTime<Utc>) -> MeshResult<Intention> {
        let title = self.title.trim().to_string();
        validate_title(&title)?;
        validate_description(&self.description)?;

        Ok(Intention {
            id,
            title,
            description: self.description,
            tags: normalize_tags(self.tags),
            category: self.category,
            location: self.location,
            geo: self.geo,
            status: IntentionStatus::Active,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
            completed_at: None,
            archived_at: None,
            embedding: None,
            embedded_at: None,
        })
    }
}

/// Partial update. `None` fields are left untouched; `geo: Some(None)` clears the coordinate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentionPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub category: Option<String>,
    pub location: Option<String>,
    pub geo: Option<Option<GeoPoint>>,
    pub status: Option<IntentionStatus>,
}

impl IntentionPatch {
    /// Whether the patch sets nothing at all.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.category.is_none()
            && self.location.is_none()
            && self.geo.is_none()
            && self.status.is_none()
    }
}

/// Join title and description the way embeddings are computed.
pub fn embedding_text(title: &str, description: &str) -> String {
    format!("{title} {description}").trim().to_string()
}

/// Title must be non-empty after trimming and at most [`MAX_TITLE_CHARS`].
pub fn validate_title(title: &str) -> MeshResult<()> {
    if title.trim().is_empty() {
        return Err(MeshError::Validation("title is required".to_string()));
    }
    let len = title.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(MeshError::Validation(format!(
            "title is {len} characters, maximum is {MAX_TITLE_CHARS}"
        )));
    }
    Ok(())
}

/// Description must be at most [`MAX_DESCRIPTION_CHARS`].
pub fn validate_description(description: &str) -> MeshResult<()> {
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_CHARS {
        return Err(MeshError::Validation(format!(
            "description is {len} characters, maximum is {MAX_DESCRIPTION_CHARS}"
        )));
    }
    Ok(())
}

fn normalize_tags(tags: BTreeSet<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
