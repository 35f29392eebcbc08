//! Configuration module for the retrieval store.
//!
//! Layered settings: built-in defaults, an optional `placemark.toml`, and
//! environment variable overrides.
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `PLACEMARK_` and use double
//! underscores to separate nested levels:
//! - `PLACEMARK_EMBEDDING__DIMENSION=1536` sets `embedding.dimension`
//! - `PLACEMARK_HYBRID__SEMANTIC_WEIGHT=0.7` sets `hybrid.semantic_weight`
//! - `PLACEMARK_FUZZY__DEFAULT_THRESHOLD=0.25` sets `fuzzy.default_threshold`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Directory for on-disk index data. `None` keeps everything in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_path: Option<PathBuf>,

    /// Embedding settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Hybrid query planner settings
    #[serde(default)]
    pub hybrid: HybridConfig,

    /// Lexical index settings
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Fuzzy-name index settings
    #[serde(default)]
    pub fuzzy: FuzzyConfig,

    /// Geospatial index settings
    #[serde(default)]
    pub geo: GeoConfig,

    /// Maintenance worker settings
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// Vector dimension, fixed for the lifetime of the store.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Model identifier for the fastembed provider.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Cache directory for downloaded model files.
    #[serde(default = "default_model_cache")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HybridConfig {
    /// Weight of the semantic channel in the blended score.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,

    /// Weight of the lexical channel in the blended score.
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f32,

    /// Candidate pool is `max(k * candidate_multiplier, candidate_floor)`.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    #[serde(default = "default_candidate_floor")]
    pub candidate_floor: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LexicalConfig {
    /// Per-tier BM25 boosts, descending importance.
    #[serde(default = "default_name_boost")]
    pub name_boost: f32,

    #[serde(default = "default_classification_boost")]
    pub classification_boost: f32,

    #[serde(default = "default_neighborhood_boost")]
    pub neighborhood_boost: f32,

    #[serde(default = "default_description_boost")]
    pub description_boost: f32,

    /// Boost for the aggregated review text tier.
    #[serde(default = "default_reviews_boost")]
    pub reviews_boost: f32,

    /// Memory budget for the tantivy writer, in bytes.
    #[serde(default = "default_writer_memory")]
    pub writer_memory_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FuzzyConfig {
    /// Minimum trigram similarity for a match when the caller does not
    /// override it.
    #[serde(default = "default_fuzzy_threshold")]
    pub default_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeoConfig {
    /// Grid cell edge length in degrees.
    #[serde(default = "default_cell_degrees")]
    pub cell_degrees: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Bound on the maintenance queue. Writers block once the queue is full,
    /// which keeps the eventual-consistency window proportional to queue
    /// depth rather than unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

// Default value functions
fn default_dimension() -> usize {
    384
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_model_cache() -> PathBuf {
    PathBuf::from(".placemark/models")
}
fn default_semantic_weight() -> f32 {
    0.6
}
fn default_lexical_weight() -> f32 {
    0.4
}
fn default_candidate_multiplier() -> usize {
    4
}
fn default_candidate_floor() -> usize {
    50
}
fn default_name_boost() -> f32 {
    4.0
}
fn default_classification_boost() -> f32 {
    2.0
}
fn default_neighborhood_boost() -> f32 {
    1.5
}
fn default_description_boost() -> f32 {
    1.0
}
fn default_reviews_boost() -> f32 {
    0.5
}
fn default_writer_memory() -> usize {
    15_000_000
}
fn default_fuzzy_threshold() -> f32 {
    0.3
}
fn default_cell_degrees() -> f64 {
    0.25
}
fn default_queue_capacity() -> usize {
    1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_path: None,
            embedding: EmbeddingConfig::default(),
            hybrid: HybridConfig::default(),
            lexical: LexicalConfig::default(),
            fuzzy: FuzzyConfig::default(),
            geo: GeoConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            model: default_embedding_model(),
            cache_dir: default_model_cache(),
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            candidate_multiplier: default_candidate_multiplier(),
            candidate_floor: default_candidate_floor(),
        }
    }
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            name_boost: default_name_boost(),
            classification_boost: default_classification_boost(),
            neighborhood_boost: default_neighborhood_boost(),
            description_boost: default_description_boost(),
            reviews_boost: default_reviews_boost(),
            writer_memory_bytes: default_writer_memory(),
        }
    }
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_fuzzy_threshold(),
        }
    }
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            cell_degrees: default_cell_degrees(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, `placemark.toml`, and the environment.
    pub fn load() -> StoreResult<Self> {
        Self::load_from("placemark.toml")
    }

    /// Load settings with an explicit TOML path (used by tests).
    pub fn load_from(toml_path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(toml_path.as_ref()))
            .merge(Env::prefixed("PLACEMARK_").split("__"))
            .extract()
            .map_err(|e| StoreError::validation("settings", e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> StoreResult<()> {
        if self.embedding.dimension == 0 {
            return Err(StoreError::validation(
                "embedding.dimension",
                "must be non-zero",
            ));
        }
        let weight_sum = self.hybrid.semantic_weight + self.hybrid.lexical_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(StoreError::validation(
                "hybrid.semantic_weight",
                format!("semantic_weight + lexical_weight must sum to 1.0, got {weight_sum}"),
            ));
        }
        if !(0.0..=1.0).contains(&self.fuzzy.default_threshold) {
            return Err(StoreError::validation(
                "fuzzy.default_threshold",
                "must be within [0.0, 1.0]",
            ));
        }
        if self.geo.cell_degrees <= 0.0 {
            return Err(StoreError::validation(
                "geo.cell_degrees",
                "must be positive",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.embedding.dimension, 384);
        assert_eq!(settings.hybrid.candidate_floor, 50);
    }

    #[test]
    fn weight_sum_is_enforced() {
        let mut settings = Settings::default();
        settings.hybrid.semantic_weight = 0.9;
        settings.hybrid.lexical_weight = 0.4;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut settings = Settings::default();
        settings.embedding.dimension = 0;
        assert!(settings.validate().is_err());
    }
}
