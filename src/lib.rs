//! placemark: a hybrid retrieval store for place and review records.
//!
//! The store answers two kinds of queries: "what matches this
//! natural-language intent" ([`RetrievalStore::hybrid_search`]) and "what
//! exact passage justifies this answer"
//! ([`RetrievalStore::get_citations`]). Behind the single handle sit four
//! specialized indexes (a graph ANN over embeddings, a tantivy inverted
//! index, a geospatial grid, and a trigram name index) plus the maintainer
//! that keeps every derived search artifact consistent with its source
//! fields.
//!
//! ```no_run
//! use std::sync::Arc;
//! use placemark::{FastEmbedProvider, PlaceWrite, RetrievalStore, SearchFilters, Settings};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::default();
//! let provider = Arc::new(FastEmbedProvider::from_model_name(
//!     &settings.embedding.model,
//!     &settings.embedding.cache_dir,
//! )?);
//! let store = RetrievalStore::new(settings, provider)?;
//!
//! store.upsert_place(
//!     PlaceWrite::new("ChIJ-place-1", "Night Swan Coffee")
//!         .with_neighborhood("NoDa")
//!         .with_tags(["quiet", "wifi"]),
//! )?;
//! let hits = store.hybrid_search("quiet place to work", &SearchFilters::none(), 5)?;
//! # let _ = hits;
//! # Ok(())
//! # }
//! ```

pub mod citation;
pub mod config;
pub mod derive;
pub mod embedding;
pub mod error;
pub mod index;
pub mod query;
pub mod storage;
pub mod types;
pub mod worker;

// Explicit exports for better API clarity
pub use citation::{Citation, CitationEntry, CitationSnapshot};
pub use config::Settings;
pub use embedding::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use error::{StoreError, StoreResult};
pub use query::{
    AmenityField, AmenitySelector, Evidence, RadiusFilter, RankedPlace, SearchFilters,
};
pub use storage::{RetrievalStore, StoreStats, SweepReport};
pub use types::{
    Amenities, Chunk, ChunkId, ChunkWrite, DerivationState, LexicalDocument, Location, Place,
    PlaceId, PlaceWrite, QuadState, TriState,
};
