//! Citation cache: a denormalized join of chunks with their parent place
//! context, optimized for read-heavy citation lookups.
//!
//! The cache is an explicit snapshot, not a live view. A refresh rebuilds
//! the whole snapshot off the live stores and swaps it in atomically;
//! queries in flight keep reading the prior snapshot until the swap.
//! Consumers must tolerate staleness up to one refresh interval.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::chunks::ChunkStore;
use crate::storage::places::PlaceStore;
use crate::types::{ChunkId, PlaceId};

/// One cached chunk with its denormalized place context.
#[derive(Debug, Clone)]
pub struct CitationEntry {
    pub chunk_id: ChunkId,
    pub place_id: PlaceId,
    pub place_name: String,
    pub neighborhood: Option<String>,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

/// A citation as returned on the query surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub text: String,
    pub occurred_at: DateTime<Utc>,
}

impl From<&CitationEntry> for Citation {
    fn from(entry: &CitationEntry) -> Self {
        Self {
            chunk_id: entry.chunk_id,
            text: entry.text.clone(),
            occurred_at: entry.occurred_at,
        }
    }
}

/// An immutable snapshot of the full join, keyed by place. Entries per
/// place are sorted most-recent-first.
#[derive(Debug)]
pub struct CitationSnapshot {
    by_place: HashMap<PlaceId, Vec<CitationEntry>>,
    entry_count: usize,
    pub built_at: DateTime<Utc>,
}

impl CitationSnapshot {
    /// Rebuild the join from the live stores. O(total chunk count); this is
    /// the resource-heavy scan the refresh operation pays for.
    pub fn build(places: &PlaceStore, chunks: &ChunkStore) -> Self {
        let place_ids = places.ids();
        let joined: Vec<(PlaceId, Vec<CitationEntry>)> = place_ids
            .par_iter()
            .filter_map(|place_id| {
                let place = places.get(place_id)?;
                let mut entries: Vec<CitationEntry> = chunks
                    .for_place(place_id)
                    .into_iter()
                    .map(|chunk| CitationEntry {
                        chunk_id: chunk.id,
                        place_id: place_id.clone(),
                        place_name: place.name.clone(),
                        neighborhood: place.neighborhood.clone(),
                        text: chunk.text,
                        occurred_at: chunk.occurred_at,
                    })
                    .collect();
                entries.sort_by(|a, b| {
                    b.occurred_at
                        .cmp(&a.occurred_at)
                        .then(a.chunk_id.cmp(&b.chunk_id))
                });
                Some((place_id.clone(), entries))
            })
            .collect();

        let mut by_place = HashMap::with_capacity(joined.len());
        let mut entry_count = 0;
        for (place_id, entries) in joined {
            entry_count += entries.len();
            by_place.insert(place_id, entries);
        }

        Self {
            by_place,
            entry_count,
            built_at: Utc::now(),
        }
    }

    /// Cached entries for a place, most recent first. `None` when the place
    /// was absent at build time (the caller falls back to the live stores).
    pub fn for_place(&self, place_id: &PlaceId) -> Option<&[CitationEntry]> {
        self.by_place.get(place_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}

/// The swappable snapshot holder.
#[derive(Debug, Default)]
pub struct CitationCache {
    snapshot: RwLock<Option<Arc<CitationSnapshot>>>,
}

impl CitationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current snapshot, if one has ever been built. Cheap to call; the
    /// returned Arc stays valid across concurrent refreshes.
    pub fn current(&self) -> Option<Arc<CitationSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Atomically install a freshly-built snapshot.
    pub fn install(&self, snapshot: CitationSnapshot) -> usize {
        let count = snapshot.len();
        *self.snapshot.write() = Some(Arc::new(snapshot));
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunks::ChunkParts;
    use crate::types::{Amenities, DerivationState, LexicalDocument, Place};
    use chrono::TimeZone;

    fn seed_place(places: &PlaceStore, id: &str, name: &str) {
        let now = Utc::now();
        places.put(Place {
            id: PlaceId::new(id),
            name: name.to_string(),
            location: None,
            neighborhood: Some("NoDa".to_string()),
            categories: Vec::new(),
            tags: Vec::new(),
            amenities: Amenities::default(),
            enriched_payload: serde_json::Value::Null,
            lexical_document: LexicalDocument::default(),
            embedding: None,
            derivation: DerivationState::Current,
            created_at: now,
            updated_at: now,
        });
    }

    fn seed_chunk(chunks: &ChunkStore, place: &str, review: &str, day: u32, text: &str) {
        chunks
            .append(ChunkParts {
                place_id: PlaceId::new(place),
                source_review_id: review.to_string(),
                ordinal: 0,
                text: text.to_string(),
                occurred_at: Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap(),
                lexical_document: text.to_lowercase(),
                embedding: None,
                derivation: DerivationState::Current,
                created_at: Utc::now(),
            })
            .unwrap();
    }

    #[test]
    fn snapshot_joins_place_context_and_sorts_recent_first() {
        let places = PlaceStore::new();
        let chunks = ChunkStore::new();
        seed_place(&places, "p1", "Amélie's");
        seed_chunk(&chunks, "p1", "r1", 1, "Older review.");
        seed_chunk(&chunks, "p1", "r2", 15, "Newer review.");

        let snapshot = CitationSnapshot::build(&places, &chunks);
        let entries = snapshot.for_place(&PlaceId::new("p1")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "Newer review.");
        assert_eq!(entries[0].place_name, "Amélie's");
        assert_eq!(entries[0].neighborhood.as_deref(), Some("NoDa"));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn cache_swap_is_atomic_for_existing_readers() {
        let places = PlaceStore::new();
        let chunks = ChunkStore::new();
        seed_place(&places, "p1", "First");
        seed_chunk(&chunks, "p1", "r1", 1, "Only one.");

        let cache = CitationCache::new();
        assert!(cache.current().is_none());
        cache.install(CitationSnapshot::build(&places, &chunks));

        let held = cache.current().unwrap();
        assert_eq!(held.len(), 1);

        // A second place appears and the cache refreshes underneath.
        seed_place(&places, "p2", "Second");
        seed_chunk(&chunks, "p2", "r9", 2, "Another.");
        cache.install(CitationSnapshot::build(&places, &chunks));

        // The old reader still sees its snapshot; new readers see the swap.
        assert_eq!(held.len(), 1);
        assert_eq!(cache.current().unwrap().len(), 2);
    }

    #[test]
    fn missing_place_reports_none_for_fallback() {
        let places = PlaceStore::new();
        let chunks = ChunkStore::new();
        let snapshot = CitationSnapshot::build(&places, &chunks);
        assert!(snapshot.for_place(&PlaceId::new("ghost")).is_none());
    }
}
