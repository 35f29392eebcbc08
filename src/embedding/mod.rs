//! Embedding generation behind a provider trait.
//!
//! The store never talks to an embedding model directly; everything goes
//! through [`EmbeddingProvider`] so production can use fastembed while tests
//! plug in a deterministic stub. The maintainer validates returned vector
//! dimensions; a provider returning the wrong dimension is treated the same
//! as a failed call.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use thiserror::Error;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Errors from embedding providers.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("failed to generate embedding: {0}")]
    Generation(String),

    #[error("unknown embedding model '{0}'")]
    UnknownModel(String),
}

/// External embedding function. Implementations must be safe to call from
/// the write path and the maintenance worker concurrently.
pub trait EmbeddingProvider: Send + Sync {
    /// Dimension of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Embed a batch of canonical texts, one vector per input, same order.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a single canonical text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("provider returned no vector".to_string()))
    }
}

/// fastembed-backed provider.
pub struct FastEmbedProvider {
    /// `TextEmbedding::embed` takes `&mut self`; the mutex provides the
    /// interior mutability the trait contract needs.
    model: Mutex<TextEmbedding>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("dimension", &self.dimension)
            .field("model", &"<TextEmbedding>")
            .finish()
    }
}

impl FastEmbedProvider {
    /// Create a provider for the given model, caching model files under
    /// `cache_dir`. Downloads the model on first use.
    pub fn new(model: EmbeddingModel, cache_dir: impl AsRef<Path>) -> Result<Self, EmbeddingError> {
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(PathBuf::from(cache_dir.as_ref()))
                .with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        // Probe the dimension with a throwaway embedding; fastembed does not
        // expose it statically for every model.
        let probe = text_model
            .embed(vec!["dimension probe"], None)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .ok_or_else(|| EmbeddingError::ModelInit("probe returned no vector".to_string()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            dimension,
        })
    }

    /// Create a provider from a configured model name.
    pub fn from_model_name(
        name: &str,
        cache_dir: impl AsRef<Path>,
    ) -> Result<Self, EmbeddingError> {
        let model = match name {
            "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
            "AllMiniLML12V2" => EmbeddingModel::AllMiniLML12V2,
            "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
            "BGEBaseENV15" => EmbeddingModel::BGEBaseENV15,
            other => return Err(EmbeddingError::UnknownModel(other.to_string())),
        };
        Self::new(model, cache_dir)
    }
}

impl EmbeddingProvider for FastEmbedProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.model
            .lock()
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::Generation(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_model_name_is_rejected() {
        let err = FastEmbedProvider::from_model_name("NotARealModel", ".cache").unwrap_err();
        assert!(matches!(err, EmbeddingError::UnknownModel(_)));
    }
}
