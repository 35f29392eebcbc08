//! Concurrent chunk record store.
//!
//! Chunks are append-only: a stored row is never mutated, only superseded
//! through the explicit replace operation or removed by an administrative
//! cascade. The `(place_id, source_review_id, ordinal)` key is unique per
//! place and backs conflict detection.

use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{StoreError, StoreResult};
use crate::types::{Chunk, ChunkId, DerivationState, PlaceId};

/// The secondary uniqueness key for a chunk.
type SourceKey = (PlaceId, String, u32);

#[derive(Debug, Default)]
struct ChunkMaps {
    chunks: DashMap<ChunkId, Chunk>,
    by_place: DashMap<PlaceId, Vec<ChunkId>>,
    by_source: DashMap<SourceKey, ChunkId>,
}

/// Keyed store for chunk rows with a per-place secondary index.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    maps: Arc<ChunkMaps>,
    next_id: Arc<AtomicU32>,
}

impl Default for ChunkStore {
    fn default() -> Self {
        Self {
            maps: Arc::new(ChunkMaps::default()),
            next_id: Arc::new(AtomicU32::new(1)),
        }
    }
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> StoreResult<ChunkId> {
        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        ChunkId::new(raw).ok_or_else(|| StoreError::validation("chunk_id", "id space exhausted"))
    }

    /// Append a new chunk. Fails with `Conflict` when the source key is
    /// already present.
    pub fn append(&self, chunk_parts: ChunkParts) -> StoreResult<Chunk> {
        let key: SourceKey = (
            chunk_parts.place_id.clone(),
            chunk_parts.source_review_id.clone(),
            chunk_parts.ordinal,
        );
        if self.maps.by_source.contains_key(&key) {
            return Err(StoreError::Conflict {
                place_id: chunk_parts.place_id.to_string(),
                source_review_id: chunk_parts.source_review_id,
                ordinal: chunk_parts.ordinal,
            });
        }
        self.commit(key, chunk_parts)
    }

    /// Replace (supersede) the chunk with the same source key, inserting if
    /// none exists. Returns the new row and the superseded id, if any.
    pub fn replace(&self, chunk_parts: ChunkParts) -> StoreResult<(Chunk, Option<ChunkId>)> {
        let key: SourceKey = (
            chunk_parts.place_id.clone(),
            chunk_parts.source_review_id.clone(),
            chunk_parts.ordinal,
        );
        let superseded = self.maps.by_source.get(&key).map(|e| *e.value());
        if let Some(old_id) = superseded {
            self.remove(old_id);
        }
        let chunk = self.commit(key, chunk_parts)?;
        Ok((chunk, superseded))
    }

    fn commit(&self, key: SourceKey, chunk_parts: ChunkParts) -> StoreResult<Chunk> {
        let id = self.allocate_id()?;
        let chunk = Chunk {
            id,
            place_id: chunk_parts.place_id.clone(),
            source_review_id: chunk_parts.source_review_id,
            ordinal: chunk_parts.ordinal,
            text: chunk_parts.text,
            occurred_at: chunk_parts.occurred_at,
            lexical_document: chunk_parts.lexical_document,
            embedding: chunk_parts.embedding,
            derivation: chunk_parts.derivation,
            created_at: chunk_parts.created_at,
        };
        self.maps.chunks.insert(id, chunk.clone());
        self.maps.by_source.insert(key, id);
        self.maps
            .by_place
            .entry(chunk_parts.place_id)
            .or_default()
            .push(id);
        Ok(chunk)
    }

    pub fn get(&self, id: ChunkId) -> Option<Chunk> {
        self.maps.chunks.get(&id).map(|e| e.clone())
    }

    /// Remove one chunk and its secondary entries.
    pub fn remove(&self, id: ChunkId) -> Option<Chunk> {
        let (_, chunk) = self.maps.chunks.remove(&id)?;
        let key: SourceKey = (
            chunk.place_id.clone(),
            chunk.source_review_id.clone(),
            chunk.ordinal,
        );
        // Only clear the source mapping if it still points at this row; a
        // replace may already have claimed the key.
        self.maps
            .by_source
            .remove_if(&key, |_, mapped| *mapped == id);
        if let Some(mut ids) = self.maps.by_place.get_mut(&chunk.place_id) {
            ids.retain(|c| *c != id);
        }
        Some(chunk)
    }

    /// Remove every chunk of a place. Returns the removed ids.
    pub fn remove_for_place(&self, place_id: &PlaceId) -> Vec<ChunkId> {
        let ids = self
            .maps
            .by_place
            .remove(place_id)
            .map(|(_, ids)| ids)
            .unwrap_or_default();
        for id in &ids {
            if let Some((_, chunk)) = self.maps.chunks.remove(id) {
                let key: SourceKey =
                    (chunk.place_id, chunk.source_review_id, chunk.ordinal);
                self.maps.by_source.remove_if(&key, |_, mapped| mapped == id);
            }
        }
        ids
    }

    /// All chunks of a place, sorted by `(source_review_id, ordinal)` so
    /// derived aggregates are deterministic.
    pub fn for_place(&self, place_id: &PlaceId) -> Vec<Chunk> {
        let ids = self
            .maps
            .by_place
            .get(place_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        let mut chunks: Vec<Chunk> = ids.iter().filter_map(|id| self.get(*id)).collect();
        chunks.sort_by(|a, b| {
            a.source_review_id
                .cmp(&b.source_review_id)
                .then(a.ordinal.cmp(&b.ordinal))
        });
        chunks
    }

    /// All chunks of a place, most recent first.
    pub fn recent_for_place(&self, place_id: &PlaceId, limit: usize) -> Vec<Chunk> {
        let mut chunks = self.for_place(place_id);
        chunks.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(a.id.cmp(&b.id)));
        chunks.truncate(limit);
        chunks
    }

    pub fn len(&self) -> usize {
        self.maps.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.chunks.is_empty()
    }

    /// Ids of rows whose derivation is pending a retry, sorted.
    pub fn pending_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self
            .maps
            .chunks
            .iter()
            .filter(|e| e.derivation == DerivationState::Pending)
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }

    /// Apply an in-place update to derived fields. The source fields of a
    /// chunk stay immutable; only derivation artifacts may change.
    pub fn update_derived(
        &self,
        id: ChunkId,
        embedding: Option<Vec<f32>>,
        derivation: DerivationState,
    ) -> bool {
        match self.maps.chunks.get_mut(&id) {
            Some(mut entry) => {
                entry.embedding = embedding;
                entry.derivation = derivation;
                true
            }
            None => false,
        }
    }
}

/// Fields for a chunk row about to be committed, produced by validation
/// plus derivation.
#[derive(Debug)]
pub struct ChunkParts {
    pub place_id: PlaceId,
    pub source_review_id: String,
    pub ordinal: u32,
    pub text: String,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
    pub lexical_document: String,
    pub embedding: Option<Vec<f32>>,
    pub derivation: DerivationState,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn parts(place: &str, review: &str, ordinal: u32, text: &str) -> ChunkParts {
        ChunkParts {
            place_id: PlaceId::new(place),
            source_review_id: review.to_string(),
            ordinal,
            text: text.to_string(),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            lexical_document: text.to_lowercase(),
            embedding: None,
            derivation: DerivationState::Current,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_duplicate_conflicts() {
        let store = ChunkStore::new();
        store.append(parts("p1", "r1", 0, "First.")).unwrap();

        let err = store.append(parts("p1", "r1", 0, "Duplicate.")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn same_ordinal_under_different_reviews_is_fine() {
        let store = ChunkStore::new();
        store.append(parts("p1", "r1", 0, "One.")).unwrap();
        store.append(parts("p1", "r2", 0, "Two.")).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn replace_supersedes_the_old_row() {
        let store = ChunkStore::new();
        let original = store.append(parts("p1", "r1", 0, "Old text.")).unwrap();

        let (replacement, superseded) =
            store.replace(parts("p1", "r1", 0, "New text.")).unwrap();
        assert_eq!(superseded, Some(original.id));
        assert_ne!(replacement.id, original.id);
        assert!(store.get(original.id).is_none());
        assert_eq!(store.for_place(&PlaceId::new("p1")).len(), 1);
    }

    #[test]
    fn for_place_sorts_by_source_key() {
        let store = ChunkStore::new();
        store.append(parts("p1", "r2", 0, "b")).unwrap();
        store.append(parts("p1", "r1", 1, "a2")).unwrap();
        store.append(parts("p1", "r1", 0, "a1")).unwrap();

        let texts: Vec<String> = store
            .for_place(&PlaceId::new("p1"))
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, vec!["a1", "a2", "b"]);
    }

    #[test]
    fn recent_for_place_orders_by_occurred_at() {
        let store = ChunkStore::new();
        let mut early = parts("p1", "r1", 0, "early");
        early.occurred_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut late = parts("p1", "r2", 0, "late");
        late.occurred_at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        store.append(early).unwrap();
        store.append(late).unwrap();

        let recent = store.recent_for_place(&PlaceId::new("p1"), 1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "late");
    }

    #[test]
    fn cascade_removes_all_chunks_of_a_place() {
        let store = ChunkStore::new();
        store.append(parts("p1", "r1", 0, "one")).unwrap();
        store.append(parts("p1", "r1", 1, "two")).unwrap();
        store.append(parts("p2", "r9", 0, "other")).unwrap();

        let removed = store.remove_for_place(&PlaceId::new("p1"));
        assert_eq!(removed.len(), 2);
        assert_eq!(store.len(), 1);
        // The key is free again after the cascade.
        store.append(parts("p1", "r1", 0, "fresh")).unwrap();
    }
}
