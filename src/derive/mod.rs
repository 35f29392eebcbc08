//! Derived artifact maintenance.
//!
//! Keeps `lexical_document` and `embedding` consistent with the source
//! fields. All composition here is deterministic: identical source fields
//! produce byte-identical artifacts. The only non-deterministic collaborator
//! is the embedding provider, and its failures never block a write; the row
//! commits with prior/empty derived fields and is marked pending for the
//! retry sweep.

use std::sync::Arc;
use tracing::warn;

use crate::embedding::EmbeddingProvider;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    Amenities, DerivationState, LexicalDocument, QuadState, TriState, ValidatedChunk,
    ValidatedPlace,
};

/// Collapse all whitespace runs (including newlines) to single spaces and
/// trim. One pass, no locale-sensitive behavior.
pub fn sanitize_field_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalization for lexical documents: whitespace collapse plus a single
/// Unicode lowercase pass.
pub fn normalize_text(value: &str) -> String {
    sanitize_field_value(value).to_lowercase()
}

/// Pull the free-text description out of the opaque enriched payload. The
/// store interprets nothing else in the payload.
pub fn payload_description(payload: &serde_json::Value) -> Option<&str> {
    payload.get("description").and_then(|v| v.as_str())
}

/// Build the place-level lexical document from the source fields. O(1) in
/// the number of chunks; the `reviews` tier is maintained separately.
pub fn compose_lexical_document(
    name: &str,
    tags: &[String],
    categories: &[String],
    neighborhood: Option<&str>,
    description: Option<&str>,
) -> LexicalDocument {
    let classification = tags
        .iter()
        .chain(categories.iter())
        .map(|s| normalize_text(s))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    LexicalDocument {
        name: normalize_text(name),
        classification,
        neighborhood: neighborhood.map(normalize_text).unwrap_or_default(),
        description: description.map(normalize_text).unwrap_or_default(),
        reviews: String::new(),
    }
}

/// Build the aggregate review tier by rescanning every chunk of a place.
/// Chunks must arrive pre-sorted by `(source_review_id, ordinal)` so the
/// digest is deterministic regardless of insertion order.
pub fn compose_review_digest<'a>(texts: impl Iterator<Item = &'a str>) -> String {
    texts
        .map(normalize_text)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn push_field(parts: &mut Vec<String>, label: &str, value: &str) {
    let sanitized = sanitize_field_value(value);
    if !sanitized.is_empty() {
        parts.push(format!("{label}: {sanitized}"));
    }
}

fn push_list(parts: &mut Vec<String>, label: &str, values: &[String]) {
    let joined = values
        .iter()
        .map(|v| sanitize_field_value(v))
        .filter(|v| !v.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    if !joined.is_empty() {
        parts.push(format!("{label}: {joined}"));
    }
}

fn push_amenities(parts: &mut Vec<String>, amenities: &Amenities) {
    if amenities.free_wifi != TriState::Unsure {
        parts.push(format!("free wifi: {}", amenities.free_wifi.as_str()));
    }
    if amenities.purchase_required != TriState::Unsure {
        parts.push(format!(
            "purchase required: {}",
            amenities.purchase_required.as_str()
        ));
    }
    if amenities.parking != TriState::Unsure {
        parts.push(format!("parking: {}", amenities.parking.as_str()));
    }
    if amenities.cinnamon_rolls != QuadState::Unsure {
        parts.push(format!(
            "cinnamon rolls: {}",
            amenities.cinnamon_rolls.as_str()
        ));
    }
}

/// Canonical text handed to the embedding provider for a place: labelled
/// `field: value` lines, most identifying fields first, unknown amenity
/// states omitted.
pub fn canonical_place_text(place: &ValidatedPlace) -> String {
    let mut parts = Vec::new();
    push_field(&mut parts, "name", &place.name);
    if let Some(neighborhood) = &place.neighborhood {
        push_field(&mut parts, "neighborhood", neighborhood);
    }
    push_list(&mut parts, "categories", &place.categories);
    push_list(&mut parts, "tags", &place.tags);
    push_amenities(&mut parts, &place.amenities);
    if let Some(description) = payload_description(&place.enriched_payload) {
        push_field(&mut parts, "description", description);
    }
    parts.join("\n")
}

/// Canonical text for a chunk: place context first so the review is
/// grounded semantically, then the review text itself.
pub fn canonical_chunk_text(
    place_name: &str,
    neighborhood: Option<&str>,
    tags: &[String],
    review_text: &str,
) -> String {
    let mut parts = Vec::new();
    push_field(&mut parts, "place", place_name);
    if let Some(neighborhood) = neighborhood {
        push_field(&mut parts, "neighborhood", neighborhood);
    }
    push_list(&mut parts, "tags", tags);
    push_field(&mut parts, "review", review_text);
    parts.join("\n")
}

/// Result of a place-level derivation pass.
#[derive(Debug)]
pub struct PlaceDerivation {
    pub lexical_document: LexicalDocument,
    pub embedding: Option<Vec<f32>>,
    pub state: DerivationState,
}

/// Result of a chunk-level derivation pass.
#[derive(Debug)]
pub struct ChunkDerivation {
    pub lexical_document: String,
    pub embedding: Option<Vec<f32>>,
    pub state: DerivationState,
}

/// The maintainer owns the embedding provider and the store-wide dimension
/// it validates returned vectors against.
pub struct Maintainer {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl std::fmt::Debug for Maintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maintainer")
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl Maintainer {
    /// Fails if the provider's dimension disagrees with the store-wide
    /// configured dimension.
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: usize) -> StoreResult<Self> {
        if provider.dimension() != dimension {
            return Err(StoreError::validation(
                "embedding.dimension",
                format!(
                    "provider produces {}-dimensional vectors but the store is configured for {}",
                    provider.dimension(),
                    dimension
                ),
            ));
        }
        Ok(Self {
            provider,
            dimension,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a canonical text, validating the returned dimension. Errors
    /// here are reported to the caller as pending state, not failed writes.
    pub fn try_embed(&self, entity: &str, text: &str) -> (Option<Vec<f32>>, DerivationState) {
        match self.provider.embed(text) {
            Ok(vector) if vector.len() == self.dimension => {
                (Some(vector), DerivationState::Current)
            }
            Ok(vector) => {
                warn!(
                    entity,
                    expected = self.dimension,
                    actual = vector.len(),
                    "embedding provider returned wrong dimension; marking row pending"
                );
                (None, DerivationState::Pending)
            }
            Err(e) => {
                warn!(entity, error = %e, "embedding call failed; marking row pending");
                (None, DerivationState::Pending)
            }
        }
    }

    /// Embed query text for the planner. Failure is the documented
    /// degrade-to-lexical path, so this returns `None` rather than an error.
    pub fn embed_query(&self, text: &str) -> Option<Vec<f32>> {
        let (vector, _) = self.try_embed("query", text);
        vector
    }

    /// Full place-level derivation: lexical document plus embedding attempt.
    /// Runs synchronously inside the write path.
    pub fn derive_place(&self, place: &ValidatedPlace) -> PlaceDerivation {
        let lexical_document = compose_lexical_document(
            &place.name,
            &place.tags,
            &place.categories,
            place.neighborhood.as_deref(),
            payload_description(&place.enriched_payload),
        );
        let canonical = canonical_place_text(place);
        let (embedding, state) = self.try_embed(place.place_id.as_str(), &canonical);
        PlaceDerivation {
            lexical_document,
            embedding,
            state,
        }
    }

    /// Chunk-level derivation with parent place context for the canonical
    /// embedding text.
    pub fn derive_chunk(
        &self,
        chunk: &ValidatedChunk,
        place_name: &str,
        neighborhood: Option<&str>,
        tags: &[String],
    ) -> ChunkDerivation {
        let lexical_document = normalize_text(&chunk.text);
        let canonical = canonical_chunk_text(place_name, neighborhood, tags, &chunk.text);
        let entity = format!("{}/{}#{}", chunk.place_id, chunk.source_review_id, chunk.ordinal);
        let (embedding, state) = self.try_embed(&entity, &canonical);
        ChunkDerivation {
            lexical_document,
            embedding,
            state,
        }
    }
}
