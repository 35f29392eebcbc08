//! The hybrid retrieval store.
//!
//! [`RetrievalStore`] owns the record stores, all four indexes, the derived
//! artifact maintainer, the citation cache, and the maintenance worker. It
//! is an explicitly-constructed handle with no process-wide state, so a
//! test store and a production store coexist without interference.
//!
//! Write path: validate, derive place-level artifacts synchronously, commit
//! the row, update the indexes. Chunk-aggregate re-derivation runs on the
//! worker queue; `flush` is the barrier for callers that need to observe it.

pub mod chunks;
pub mod places;

pub use chunks::{ChunkParts, ChunkStore};
pub use places::PlaceStore;

use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

use crate::citation::{Citation, CitationCache, CitationSnapshot};
use crate::config::Settings;
use crate::derive::{self, Maintainer};
use crate::embedding::EmbeddingProvider;
use crate::error::{StoreError, StoreResult};
use crate::index::{FuzzyNameIndex, GeoIndex, LexicalIndex, SemanticIndex};
use crate::query::{Evidence, RankedPlace, SearchFilters};
use crate::types::{
    Chunk, ChunkWrite, DerivationState, LexicalDocument, Location, Place, PlaceId, PlaceWrite,
    ValidatedPlace,
};
use crate::worker::{MaintenanceJob, MaintenanceQueue};

/// Words that carry no lexical signal on their own. A query made only of
/// these degrades to pure semantic ranking.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

/// Row and index counts for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub places: usize,
    pub chunks: usize,
    pub pending_places: usize,
    pub pending_chunks: usize,
    pub place_vectors: usize,
    pub chunk_vectors: usize,
    pub cached_citations: usize,
}

/// Outcome of a pending-row retry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub places_recovered: usize,
    pub chunks_recovered: usize,
    pub places_still_pending: usize,
    pub chunks_still_pending: usize,
}

/// Maps external place ids to the dense u32 ids the semantic index wants.
#[derive(Debug, Default)]
struct DocTable {
    by_place: DashMap<PlaceId, u32>,
    by_doc: DashMap<u32, PlaceId>,
    next: AtomicU32,
}

impl DocTable {
    fn new() -> Self {
        Self {
            by_place: DashMap::new(),
            by_doc: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }

    fn id_for(&self, place_id: &PlaceId) -> u32 {
        if let Some(existing) = self.by_place.get(place_id) {
            return *existing;
        }
        let doc = self.next.fetch_add(1, Ordering::Relaxed);
        self.by_place.insert(place_id.clone(), doc);
        self.by_doc.insert(doc, place_id.clone());
        doc
    }

    fn place_of(&self, doc: u32) -> Option<PlaceId> {
        self.by_doc.get(&doc).map(|e| e.clone())
    }

    fn remove(&self, place_id: &PlaceId) -> Option<u32> {
        let (_, doc) = self.by_place.remove(place_id)?;
        self.by_doc.remove(&doc);
        Some(doc)
    }
}

/// Shared internals; the worker thread holds a weak reference to this.
struct StoreCore {
    settings: Settings,
    maintainer: Maintainer,
    places: PlaceStore,
    chunks: ChunkStore,
    docs: DocTable,
    place_vectors: SemanticIndex,
    chunk_vectors: SemanticIndex,
    lexical: LexicalIndex,
    geo: GeoIndex,
    fuzzy: FuzzyNameIndex,
    citations: CitationCache,
}

/// The hybrid retrieval store handle.
pub struct RetrievalStore {
    core: Arc<StoreCore>,
    queue: MaintenanceQueue,
}

impl std::fmt::Debug for RetrievalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalStore")
            .field("places", &self.core.places.len())
            .field("chunks", &self.core.chunks.len())
            .finish_non_exhaustive()
    }
}

impl RetrievalStore {
    /// Construct a store with the given settings and embedding provider.
    /// The provider's dimension must match `settings.embedding.dimension`.
    pub fn new(settings: Settings, provider: Arc<dyn EmbeddingProvider>) -> StoreResult<Self> {
        settings.validate()?;
        let dimension = settings.embedding.dimension;
        let maintainer = Maintainer::new(provider, dimension)?;

        let lexical = match &settings.index_path {
            Some(base) => LexicalIndex::open(&base.join("lexical"), settings.lexical.clone())?,
            None => LexicalIndex::in_ram(settings.lexical.clone())?,
        };

        let core = Arc::new(StoreCore {
            place_vectors: SemanticIndex::new(dimension),
            chunk_vectors: SemanticIndex::new(dimension),
            geo: GeoIndex::new(settings.geo.cell_degrees),
            fuzzy: FuzzyNameIndex::new(),
            citations: CitationCache::new(),
            places: PlaceStore::new(),
            chunks: ChunkStore::new(),
            docs: DocTable::new(),
            maintainer,
            lexical,
            settings,
        });

        let weak = Arc::downgrade(&core);
        let queue = MaintenanceQueue::start(core.settings.worker.queue_capacity, move |job| {
            let Some(core) = weak.upgrade() else {
                return;
            };
            match job {
                MaintenanceJob::Reaggregate(place_id) => core.apply_reaggregate(&place_id),
                MaintenanceJob::PendingSweep => {
                    core.sweep_pending();
                }
            }
        });

        Ok(Self { core, queue })
    }

    // ---- ingestion surface ----

    /// Insert or replace a place. The enriched payload is overwritten
    /// wholesale (last writer wins; no version token). Place-level derived
    /// fields are recomputed before this returns, so the committed row is
    /// self-consistent.
    pub fn upsert_place(&self, write: PlaceWrite) -> StoreResult<Place> {
        self.core.upsert_place(write)
    }

    /// Append a new chunk. Schedules the place-level aggregate
    /// re-derivation on the worker queue; use [`flush`](Self::flush) as a
    /// consistency barrier when needed.
    pub fn append_chunk(&self, write: ChunkWrite) -> StoreResult<Chunk> {
        let chunk = self.core.append_chunk(write)?;
        self.queue
            .submit(MaintenanceJob::Reaggregate(chunk.place_id.clone()));
        Ok(chunk)
    }

    /// Supersede the chunk with the same `(place_id, source_review_id,
    /// ordinal)`, inserting if none exists.
    pub fn replace_chunk(&self, write: ChunkWrite) -> StoreResult<Chunk> {
        let chunk = self.core.replace_chunk(write)?;
        self.queue
            .submit(MaintenanceJob::Reaggregate(chunk.place_id.clone()));
        Ok(chunk)
    }

    /// Administrative deletion. Cascades to the place's chunks; the
    /// citation cache keeps serving its stale snapshot until the next
    /// refresh. Returns `false` when the place was unknown.
    pub fn delete_place(&self, place_id: &PlaceId) -> bool {
        self.core.delete_place(place_id)
    }

    // ---- query surface ----

    pub fn get_place(&self, place_id: &PlaceId) -> Option<Place> {
        self.core.places.get(place_id)
    }

    pub fn all_place_ids(&self) -> Vec<PlaceId> {
        self.core.places.ids()
    }

    /// Blended semantic + lexical search over the filtered place universe.
    /// See the crate docs for the scoring contract.
    pub fn hybrid_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<RankedPlace>> {
        self.core.hybrid_search(query_text, filters, k)
    }

    /// Citations for one place: semantic matches for a query, or the most
    /// recent chunks when the query is empty.
    pub fn get_citations(
        &self,
        place_id: &PlaceId,
        query_text: &str,
        limit: usize,
    ) -> StoreResult<Vec<Citation>> {
        self.core.get_citations(place_id, query_text, limit)
    }

    /// Typo-tolerant name lookup. `threshold` falls back to the configured
    /// store-wide default.
    pub fn fuzzy_match(&self, name: &str, threshold: Option<f32>) -> Vec<(PlaceId, f32)> {
        let threshold = threshold.unwrap_or(self.core.settings.fuzzy.default_threshold);
        self.core.fuzzy.fuzzy_match(name, threshold)
    }

    /// Places within `meters` of `center`, boundary inclusive. Places with
    /// unknown location never match.
    pub fn within_radius(&self, center: Location, meters: f64) -> StoreResult<Vec<PlaceId>> {
        center.validate()?;
        if !meters.is_finite() || meters < 0.0 {
            return Err(StoreError::validation(
                "meters",
                "must be a non-negative number",
            ));
        }
        Ok(self.core.geo.within_radius(center, meters))
    }

    // ---- administrative surface ----

    /// Rebuild the citation cache from the live stores and swap it in
    /// atomically. This is the one heavy full-rescan operation; schedule it
    /// outside peak query load. Returns the number of cached entries.
    pub fn refresh_citation_cache(&self) -> usize {
        let snapshot = CitationSnapshot::build(&self.core.places, &self.core.chunks);
        let count = self.core.citations.install(snapshot);
        info!(entries = count, "citation cache refreshed");
        count
    }

    /// Force a full derivation and index update for one place, including
    /// retries for its pending chunks. Repair tool after derivation
    /// failures.
    pub fn reindex(&self, place_id: &PlaceId) -> StoreResult<Place> {
        self.core.reindex(place_id)
    }

    /// Synchronously reprocess every row marked `Pending`.
    pub fn run_pending_sweep(&self) -> SweepReport {
        self.core.sweep_pending()
    }

    /// Schedule a pending sweep on the worker queue.
    pub fn schedule_pending_sweep(&self) {
        self.queue.submit(MaintenanceJob::PendingSweep);
    }

    /// Block until all maintenance queued before this call has run.
    pub fn flush(&self) {
        self.queue.flush();
    }

    pub fn stats(&self) -> StoreStats {
        let core = &self.core;
        StoreStats {
            places: core.places.len(),
            chunks: core.chunks.len(),
            pending_places: core.places.pending_ids().len(),
            pending_chunks: core.chunks.pending_ids().len(),
            place_vectors: core.place_vectors.len(),
            chunk_vectors: core.chunk_vectors.len(),
            cached_citations: core.citations.current().map(|s| s.len()).unwrap_or(0),
        }
    }
}

impl StoreCore {
    fn upsert_place(&self, write: PlaceWrite) -> StoreResult<Place> {
        let validated = write.validate()?;
        let derivation = self.maintainer.derive_place(&validated);
        let now = Utc::now();

        let existing = self.places.get(&validated.place_id);
        let created_at = existing.as_ref().map(|p| p.created_at).unwrap_or(now);
        // The aggregate tier survives the write untouched; it tracks the
        // chunk store, not the place fields.
        let prior_reviews = existing
            .as_ref()
            .map(|p| p.lexical_document.reviews.clone())
            .unwrap_or_default();
        let prior_embedding = existing.and_then(|p| p.embedding);

        let mut lexical_document = derivation.lexical_document;
        lexical_document.reviews = prior_reviews;

        let (embedding, state) = match derivation.embedding {
            Some(vector) => (Some(vector), DerivationState::Current),
            None => (prior_embedding, DerivationState::Pending),
        };

        let place = Place {
            id: validated.place_id.clone(),
            name: validated.name.clone(),
            location: validated.location,
            neighborhood: validated.neighborhood.clone(),
            categories: validated.categories.clone(),
            tags: validated.tags.clone(),
            amenities: validated.amenities,
            enriched_payload: validated.enriched_payload.clone(),
            lexical_document,
            embedding,
            derivation: state,
            created_at,
            updated_at: now,
        };

        self.places.put(place.clone());

        let doc = self.docs.id_for(&place.id);
        match &place.embedding {
            Some(vector) => self.place_vectors.insert(doc, vector)?,
            None => {
                self.place_vectors.remove(doc);
            }
        }
        self.lexical.upsert(place.id.as_str(), &place.lexical_document)?;
        match place.location {
            Some(location) => self.geo.upsert(place.id.clone(), location),
            None => {
                self.geo.remove(&place.id);
            }
        }
        self.fuzzy.upsert(place.id.clone(), &place.name);

        debug!(place_id = %place.id, state = ?place.derivation, "place upserted");
        Ok(place)
    }

    fn chunk_parts(&self, write: ChunkWrite) -> StoreResult<ChunkParts> {
        let validated = write.validate()?;
        let place = self.places.get(&validated.place_id).ok_or_else(|| {
            StoreError::validation(
                "place_id",
                format!("unknown place '{}'", validated.place_id),
            )
        })?;
        let derived = self.maintainer.derive_chunk(
            &validated,
            &place.name,
            place.neighborhood.as_deref(),
            &place.tags,
        );
        Ok(ChunkParts {
            place_id: validated.place_id,
            source_review_id: validated.source_review_id,
            ordinal: validated.ordinal,
            text: validated.text,
            occurred_at: validated.occurred_at,
            lexical_document: derived.lexical_document,
            embedding: derived.embedding,
            derivation: derived.state,
            created_at: Utc::now(),
        })
    }

    fn append_chunk(&self, write: ChunkWrite) -> StoreResult<Chunk> {
        let parts = self.chunk_parts(write)?;
        let chunk = self.chunks.append(parts)?;
        if let Some(vector) = &chunk.embedding {
            self.chunk_vectors.insert(chunk.id.get(), vector)?;
        }
        debug!(chunk_id = %chunk.id, place_id = %chunk.place_id, "chunk appended");
        Ok(chunk)
    }

    fn replace_chunk(&self, write: ChunkWrite) -> StoreResult<Chunk> {
        let parts = self.chunk_parts(write)?;
        let (chunk, superseded) = self.chunks.replace(parts)?;
        if let Some(old_id) = superseded {
            self.chunk_vectors.remove(old_id.get());
        }
        if let Some(vector) = &chunk.embedding {
            self.chunk_vectors.insert(chunk.id.get(), vector)?;
        }
        debug!(chunk_id = %chunk.id, superseded = ?superseded, "chunk replaced");
        Ok(chunk)
    }

    fn delete_place(&self, place_id: &PlaceId) -> bool {
        if self.places.remove(place_id).is_none() {
            return false;
        }
        for chunk_id in self.chunks.remove_for_place(place_id) {
            self.chunk_vectors.remove(chunk_id.get());
        }
        if let Some(doc) = self.docs.remove(place_id) {
            self.place_vectors.remove(doc);
        }
        if let Err(e) = self.lexical.remove(place_id.as_str()) {
            warn!(place_id = %place_id, error = %e, "lexical removal failed");
        }
        self.geo.remove(place_id);
        self.fuzzy.remove(place_id);
        info!(place_id = %place_id, "place deleted with chunk cascade");
        true
    }

    /// Rescan all chunks of a place and rebuild the aggregate lexical tier.
    /// Runs on the worker thread; failures are logged, and the next write or
    /// reindex retries the aggregate.
    fn apply_reaggregate(&self, place_id: &PlaceId) {
        let chunks = self.chunks.for_place(place_id);
        let digest = derive::compose_review_digest(chunks.iter().map(|c| c.text.as_str()));

        let updated = self.places.update(place_id, |place| {
            place.lexical_document.reviews = digest;
        });
        if !updated {
            // The place was deleted between scheduling and execution.
            return;
        }
        if let Some(place) = self.places.get(place_id)
            && let Err(e) = self.lexical.upsert(place_id.as_str(), &place.lexical_document)
        {
            warn!(place_id = %place_id, error = %e, "aggregate lexical update failed");
        }
    }

    fn reindex(&self, place_id: &PlaceId) -> StoreResult<Place> {
        let row = self.places.get(place_id).ok_or_else(|| {
            StoreError::validation("place_id", format!("unknown place '{place_id}'"))
        })?;
        let write = PlaceWrite {
            place_id: row.id.to_string(),
            name: row.name,
            location: row.location,
            neighborhood: row.neighborhood,
            categories: row.categories.into_iter().map(serde_json::Value::String).collect(),
            tags: row.tags.into_iter().map(serde_json::Value::String).collect(),
            amenities: row.amenities,
            enriched_payload: row.enriched_payload,
        };
        let place = self.upsert_place(write)?;
        self.apply_reaggregate(place_id);
        self.retry_pending_chunks(Some(place_id));
        Ok(self.places.get(place_id).unwrap_or(place))
    }

    fn validated_from(place: &Place) -> ValidatedPlace {
        ValidatedPlace {
            place_id: place.id.clone(),
            name: place.name.clone(),
            location: place.location,
            neighborhood: place.neighborhood.clone(),
            categories: place.categories.clone(),
            tags: place.tags.clone(),
            amenities: place.amenities,
            enriched_payload: place.enriched_payload.clone(),
        }
    }

    /// Retry embeddings for pending chunks, optionally restricted to one
    /// place. Returns `(recovered, still_pending)`.
    fn retry_pending_chunks(&self, only_place: Option<&PlaceId>) -> (usize, usize) {
        let mut recovered = 0;
        let mut still_pending = 0;
        for chunk_id in self.chunks.pending_ids() {
            let Some(chunk) = self.chunks.get(chunk_id) else {
                continue;
            };
            if let Some(filter) = only_place
                && chunk.place_id != *filter
            {
                continue;
            }
            let Some(place) = self.places.get(&chunk.place_id) else {
                continue;
            };
            let canonical = derive::canonical_chunk_text(
                &place.name,
                place.neighborhood.as_deref(),
                &place.tags,
                &chunk.text,
            );
            let entity = format!("{}/{}", chunk.place_id, chunk.id);
            match self.maintainer.try_embed(&entity, &canonical) {
                (Some(vector), _) => {
                    if let Err(e) = self.chunk_vectors.insert(chunk.id.get(), &vector) {
                        warn!(chunk_id = %chunk.id, error = %e, "chunk vector insert failed");
                        still_pending += 1;
                        continue;
                    }
                    self.chunks
                        .update_derived(chunk.id, Some(vector), DerivationState::Current);
                    recovered += 1;
                }
                (None, _) => still_pending += 1,
            }
        }
        (recovered, still_pending)
    }

    fn sweep_pending(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for place_id in self.places.pending_ids() {
            let Some(place) = self.places.get(&place_id) else {
                continue;
            };
            let validated = Self::validated_from(&place);
            let canonical = derive::canonical_place_text(&validated);
            match self.maintainer.try_embed(place_id.as_str(), &canonical) {
                (Some(vector), _) => {
                    let doc = self.docs.id_for(&place_id);
                    if let Err(e) = self.place_vectors.insert(doc, &vector) {
                        warn!(place_id = %place_id, error = %e, "place vector insert failed");
                        report.places_still_pending += 1;
                        continue;
                    }
                    self.places.update(&place_id, |row| {
                        row.embedding = Some(vector.clone());
                        row.derivation = DerivationState::Current;
                    });
                    report.places_recovered += 1;
                }
                (None, _) => report.places_still_pending += 1,
            }
        }

        let (recovered, still_pending) = self.retry_pending_chunks(None);
        report.chunks_recovered = recovered;
        report.chunks_still_pending = still_pending;

        if report.places_recovered + report.chunks_recovered > 0 {
            info!(
                places = report.places_recovered,
                chunks = report.chunks_recovered,
                "pending sweep recovered rows"
            );
        }
        report
    }

    // ---- planner ----

    fn hybrid_search(
        &self,
        query_text: &str,
        filters: &SearchFilters,
        k: usize,
    ) -> StoreResult<Vec<RankedPlace>> {
        filters.validate()?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let hybrid = &self.settings.hybrid;
        let k1 = (k * hybrid.candidate_multiplier).max(hybrid.candidate_floor);

        // Semantic channel; a failed query embedding degrades to
        // lexical-only rather than failing the search.
        let query_vector = self.maintainer.embed_query(query_text);
        let mut candidates: Vec<(PlaceId, Option<f32>)> = match &query_vector {
            Some(vector) => self
                .place_vectors
                .search(vector, k1)?
                .into_iter()
                .filter_map(|(doc, dist)| self.docs.place_of(doc).map(|id| (id, Some(dist))))
                .collect(),
            None => {
                warn!("query embedding unavailable; degrading to lexical-only search");
                Vec::new()
            }
        };
        if candidates.is_empty() {
            // Degraded path, or no place embeddings exist yet: seed the
            // candidate pool from the lexical index instead.
            candidates = self
                .lexical_rank(query_text, None, k1)?
                .into_iter()
                .map(|(id, _)| (id, None))
                .collect();
        }

        // Hard filter intersection.
        let radius_ids: Option<HashSet<PlaceId>> = filters.radius.as_ref().map(|r| {
            self.geo
                .within_radius(r.center, r.meters)
                .into_iter()
                .collect()
        });
        let mut filtered: Vec<(PlaceId, Option<f32>)> = Vec::with_capacity(candidates.len());
        for (place_id, distance) in candidates {
            let Some(place) = self.places.get(&place_id) else {
                continue;
            };
            if !filters.matches_row(&place) {
                continue;
            }
            if let Some(allowed) = &radius_ids
                && !allowed.contains(&place_id)
            {
                continue;
            }
            filtered.push((place_id, distance));
        }
        if filtered.is_empty() {
            return Ok(Vec::new());
        }

        // Lexical channel over the same filtered universe.
        let raw_lexical: HashMap<PlaceId, f32> = if has_lexical_signal(query_text) {
            let universe: Vec<&str> = filtered.iter().map(|(id, _)| id.as_str()).collect();
            self.lexical_rank(query_text, Some(&universe), universe.len())?
                .into_iter()
                .collect()
        } else {
            HashMap::new()
        };

        // Blend. Each channel min-max normalizes over the filtered set.
        let mut semantic_norm: HashMap<PlaceId, f32> = filtered
            .iter()
            .filter_map(|(id, dist)| dist.map(|d| (id.clone(), (1.0 - d).max(0.0))))
            .collect();
        crate::query::normalize_scores(&mut semantic_norm);
        let mut lexical_norm = raw_lexical.clone();
        crate::query::normalize_scores(&mut lexical_norm);

        let blend_both = !semantic_norm.is_empty() && !lexical_norm.is_empty();
        let mut ranked: Vec<RankedPlace> = filtered
            .into_iter()
            .map(|(place_id, distance)| {
                let semantic = semantic_norm.get(&place_id).copied();
                let lexical = lexical_norm.get(&place_id).copied();
                let score = if blend_both {
                    hybrid.semantic_weight * semantic.unwrap_or(0.0)
                        + hybrid.lexical_weight * lexical.unwrap_or(0.0)
                } else {
                    semantic.or(lexical).unwrap_or(0.0)
                };
                RankedPlace {
                    evidence: Evidence {
                        semantic_distance: distance,
                        lexical_score: raw_lexical.get(&place_id).copied(),
                    },
                    place_id,
                    score,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.place_id.cmp(&b.place_id))
        });
        ranked.truncate(k);
        Ok(ranked)
    }

    /// Lexical ranking with the degraded full-scan fallback. `universe`
    /// restricts results to an explicit id set.
    fn lexical_rank(
        &self,
        query: &str,
        universe: Option<&[&str]>,
        limit: usize,
    ) -> StoreResult<Vec<(PlaceId, f32)>> {
        let attempt = match universe {
            Some(allowed) => self.lexical.search_within(query, allowed.iter(), limit),
            None => self.lexical.search(query, limit),
        };
        match attempt {
            Ok(hits) => Ok(hits
                .into_iter()
                .map(|(id, score)| (PlaceId::new(id), score))
                .collect()),
            Err(e) => {
                warn!(error = %e, "lexical index unavailable; falling back to full scan");
                let documents: Vec<(String, LexicalDocument)> = match universe {
                    Some(allowed) => allowed
                        .iter()
                        .filter_map(|id| {
                            let place_id = PlaceId::new(*id);
                            self.places
                                .get(&place_id)
                                .map(|p| (id.to_string(), p.lexical_document))
                        })
                        .collect(),
                    None => self
                        .places
                        .ids()
                        .into_iter()
                        .filter_map(|id| {
                            self.places
                                .get(&id)
                                .map(|p| (id.to_string(), p.lexical_document))
                        })
                        .collect(),
                };
                let mut ranked =
                    crate::index::lexical::scan_rank(query, &documents, &self.settings.lexical);
                ranked.truncate(limit);
                Ok(ranked
                    .into_iter()
                    .map(|(id, score)| (PlaceId::new(id), score))
                    .collect())
            }
        }
    }

    // ---- citations ----

    fn get_citations(
        &self,
        place_id: &PlaceId,
        query_text: &str,
        limit: usize,
    ) -> StoreResult<Vec<Citation>> {
        if !self.places.contains(place_id) {
            return Err(StoreError::validation(
                "place_id",
                format!("unknown place '{place_id}'"),
            ));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let trimmed = query_text.trim();
        if trimmed.is_empty() {
            return Ok(self.recent_citations(place_id, limit));
        }

        let Some(query_vector) = self.maintainer.embed_query(trimmed) else {
            warn!(place_id = %place_id, "query embedding unavailable; returning recent citations");
            return Ok(self.recent_citations(place_id, limit));
        };

        let chunk_ids: HashSet<u32> = self
            .chunks
            .for_place(place_id)
            .into_iter()
            .map(|c| c.id.get())
            .collect();
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let hits =
            self.chunk_vectors
                .search_filtered(&query_vector, limit, |id| chunk_ids.contains(&id))?;

        let citations = hits
            .into_iter()
            .filter_map(|(raw_id, _)| {
                let chunk_id = crate::types::ChunkId::new(raw_id)?;
                let chunk = self.chunks.get(chunk_id)?;
                Some(Citation {
                    chunk_id,
                    text: chunk.text,
                    occurred_at: chunk.occurred_at,
                })
            })
            .collect();
        Ok(citations)
    }

    /// Most-recent-first citations, preferring the cache snapshot and
    /// falling back to the live chunk store for places the cache has never
    /// seen.
    fn recent_citations(&self, place_id: &PlaceId, limit: usize) -> Vec<Citation> {
        if let Some(snapshot) = self.citations.current()
            && let Some(entries) = snapshot.for_place(place_id)
        {
            return entries.iter().take(limit).map(Citation::from).collect();
        }
        self.chunks
            .recent_for_place(place_id, limit)
            .into_iter()
            .map(|chunk| Citation {
                chunk_id: chunk.id,
                text: chunk.text,
                occurred_at: chunk.occurred_at,
            })
            .collect()
    }
}

/// Whether the query contains terms worth a lexical ranking at all.
fn has_lexical_signal(query: &str) -> bool {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|token| token.len() >= 2 && !STOP_WORDS.contains(&token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_signal_detection() {
        assert!(has_lexical_signal("quiet place to work"));
        assert!(!has_lexical_signal("the of and"));
        assert!(!has_lexical_signal("a"));
        assert!(!has_lexical_signal(""));
    }

    #[test]
    fn doc_table_is_stable_per_place() {
        let docs = DocTable::new();
        let a = docs.id_for(&PlaceId::new("a"));
        let b = docs.id_for(&PlaceId::new("b"));
        assert_ne!(a, b);
        assert_eq!(docs.id_for(&PlaceId::new("a")), a);
        assert_eq!(docs.place_of(a), Some(PlaceId::new("a")));
        assert_eq!(docs.remove(&PlaceId::new("a")), Some(a));
        assert_eq!(docs.place_of(a), None);
    }
}
