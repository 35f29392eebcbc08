//! Core record types and type-safe identifiers for the retrieval store.
//!
//! The ingestion contract types (`PlaceWrite`, `ChunkWrite`) deliberately
//! accept loosely-typed input and are validated at the store boundary; the
//! stored types (`Place`, `Chunk`) are fully typed and carry the derived
//! search artifacts alongside the source fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::num::NonZeroU32;

use crate::error::{StoreError, StoreResult};

/// Chunk record fields that would identify the reviewer. Their presence in
/// an ingestion record is a validation error, not a field to be dropped.
pub const DISALLOWED_CHUNK_FIELDS: &[&str] = &[
    "reviewer",
    "reviewer_name",
    "reviewerName",
    "reviewer_id",
    "reviewerId",
    "author",
    "author_name",
    "authorName",
    "user",
    "user_name",
    "username",
    "handle",
    "profile_url",
    "profileUrl",
    "reviewer_profile_url",
    "avatar_url",
];

/// Externally-assigned, immutable place identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaceId(String);

impl PlaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Store-assigned chunk identifier.
///
/// Uses `NonZeroU32` internally so a zero id can never masquerade as a
/// valid chunk reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(NonZeroU32);

impl ChunkId {
    /// Returns `None` if the provided id is zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.get())
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(StoreError::validation(
                "location.latitude",
                format!("{} is outside [-90, 90]", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(StoreError::validation(
                "location.longitude",
                format!("{} is outside [-180, 180]", self.longitude),
            ));
        }
        Ok(())
    }
}

/// Three-state amenity answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    Yes,
    No,
    #[default]
    Unsure,
}

impl TriState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "unsure" => Some(Self::Unsure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unsure => "unsure",
        }
    }
}

/// Four-state amenity answer, for amenities that come and go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuadState {
    Yes,
    No,
    Sometimes,
    #[default]
    Unsure,
}

impl QuadState {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "yes" => Some(Self::Yes),
            "no" => Some(Self::No),
            "sometimes" => Some(Self::Sometimes),
            "unsure" => Some(Self::Unsure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Sometimes => "sometimes",
            Self::Unsure => "unsure",
        }
    }
}

/// The fixed amenity set. Never free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Amenities {
    #[serde(default)]
    pub free_wifi: TriState,
    #[serde(default)]
    pub purchase_required: TriState,
    #[serde(default)]
    pub parking: TriState,
    #[serde(default)]
    pub cinnamon_rolls: QuadState,
}

/// Whether a row's derived artifacts reflect its current source fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DerivationState {
    /// Derived fields are consistent with the source fields.
    Current,
    /// The embedding call failed; a retry sweep will reprocess this row.
    Pending,
}

/// The weighted searchable text representation of a place, rebuilt from the
/// source fields on every write. Tiers are ordered by descending importance;
/// the lexical index boosts matches accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LexicalDocument {
    /// Tier A: the place name.
    pub name: String,
    /// Tier B: tags and categories.
    pub classification: String,
    /// Tier C: neighborhood.
    pub neighborhood: String,
    /// Tier D: free-text description from the enriched payload.
    pub description: String,
    /// Aggregate tier: normalized text of all child chunks. Maintained
    /// asynchronously, so it may lag the chunk store by the queue depth.
    pub reviews: String,
}

/// Ingestion contract for a place write.
///
/// Array fields are accepted as raw JSON values so the store can reject
/// malformed input (nested or non-string arrays) with a `ValidationError`
/// instead of silently coercing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceWrite {
    pub place_id: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub categories: Vec<Value>,
    #[serde(default)]
    pub tags: Vec<Value>,
    #[serde(default)]
    pub amenities: Amenities,
    /// Opaque structured document from the upstream provider. Replaced
    /// wholesale on every write; never merged.
    #[serde(default)]
    pub enriched_payload: Value,
}

impl PlaceWrite {
    pub fn new(place_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            place_id: place_id.into(),
            name: name.into(),
            location: None,
            neighborhood: None,
            categories: Vec::new(),
            tags: Vec::new(),
            amenities: Amenities::default(),
            enriched_payload: Value::Null,
        }
    }

    #[must_use]
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some(Location::new(latitude, longitude));
        self
    }

    #[must_use]
    pub fn with_neighborhood(mut self, neighborhood: impl Into<String>) -> Self {
        self.neighborhood = Some(neighborhood.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(|t| Value::String(t.into())).collect();
        self
    }

    #[must_use]
    pub fn with_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories
            .into_iter()
            .map(|c| Value::String(c.into()))
            .collect();
        self
    }

    #[must_use]
    pub fn with_amenities(mut self, amenities: Amenities) -> Self {
        self.amenities = amenities;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.enriched_payload = payload;
        self
    }

    /// Validate the write and produce the typed parts the store commits.
    pub fn validate(self) -> StoreResult<ValidatedPlace> {
        if self.place_id.trim().is_empty() {
            return Err(StoreError::validation("place_id", "must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(StoreError::validation("name", "must not be empty"));
        }
        if let Some(location) = &self.location {
            location.validate()?;
        }
        let categories = flat_string_array("categories", self.categories)?;
        let tags = flat_string_array("tags", self.tags)?;
        Ok(ValidatedPlace {
            place_id: PlaceId::new(self.place_id),
            name: self.name,
            location: self.location,
            neighborhood: self.neighborhood,
            categories,
            tags,
            amenities: self.amenities,
            enriched_payload: self.enriched_payload,
        })
    }
}

/// Rank-1 homogeneous string arrays only; anything else is malformed input.
fn flat_string_array(field: &'static str, values: Vec<Value>) -> StoreResult<Vec<String>> {
    values
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            Value::Array(_) | Value::Object(_) => Err(StoreError::validation(
                field,
                "nested values are not allowed; expected a flat array of strings",
            )),
            other => Err(StoreError::validation(
                field,
                format!("expected a string element, got {other}"),
            )),
        })
        .collect()
}

/// A validated place write, ready for derivation and commit.
#[derive(Debug, Clone)]
pub struct ValidatedPlace {
    pub place_id: PlaceId,
    pub name: String,
    pub location: Option<Location>,
    pub neighborhood: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub amenities: Amenities,
    pub enriched_payload: Value,
}

/// A stored place row, including derived artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub name: String,
    pub location: Option<Location>,
    pub neighborhood: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub amenities: Amenities,
    pub enriched_payload: Value,
    /// Derived. Never client-settable.
    pub lexical_document: LexicalDocument,
    /// Derived. `None` until the embedding provider has produced a vector.
    pub embedding: Option<Vec<f32>>,
    pub derivation: DerivationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ingestion contract for a chunk write.
///
/// Unknown fields are captured rather than dropped so the no-PII contract
/// can be enforced: any extra field is rejected, and reviewer-identity
/// fields are rejected by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWrite {
    pub place_id: String,
    pub source_review_id: String,
    pub ordinal: u32,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten, default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkWrite {
    pub fn new(
        place_id: impl Into<String>,
        source_review_id: impl Into<String>,
        ordinal: u32,
        text: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            place_id: place_id.into(),
            source_review_id: source_review_id.into(),
            ordinal,
            text: text.into(),
            occurred_at,
            extra: BTreeMap::new(),
        }
    }

    pub fn validate(self) -> StoreResult<ValidatedChunk> {
        if self.place_id.trim().is_empty() {
            return Err(StoreError::validation("place_id", "must not be empty"));
        }
        if self.source_review_id.trim().is_empty() {
            return Err(StoreError::validation(
                "source_review_id",
                "must not be empty",
            ));
        }
        if self.text.trim().is_empty() {
            return Err(StoreError::validation("text", "must not be empty"));
        }
        if let Some(pii) = self
            .extra
            .keys()
            .find(|k| DISALLOWED_CHUNK_FIELDS.contains(&k.as_str()))
        {
            return Err(StoreError::validation(
                pii.clone(),
                "reviewer identity fields are not permitted in chunk records",
            ));
        }
        if let Some(unknown) = self.extra.keys().next() {
            return Err(StoreError::validation(
                unknown.clone(),
                "unrecognized field in chunk record",
            ));
        }
        Ok(ValidatedChunk {
            place_id: PlaceId::new(self.place_id),
            source_review_id: self.source_review_id,
            ordinal: self.ordinal,
            text: self.text,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedChunk {
    pub place_id: PlaceId,
    pub source_review_id: String,
    pub ordinal: u32,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// A stored chunk row. Immutable once written; superseded only through
/// `replace_chunk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub place_id: PlaceId,
    pub source_review_id: String,
    pub ordinal: u32,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
    /// Derived: normalized `text`.
    pub lexical_document: String,
    /// Derived. `None` until the embedding provider has produced a vector.
    pub embedding: Option<Vec<f32>>,
    pub derivation: DerivationState,
    pub created_at: DateTime<Utc>,
}
