//! Shared test fixtures: deterministic embedding providers and store
//! builders that never touch the network.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use placemark::embedding::{EmbeddingError, EmbeddingProvider};
use placemark::{RetrievalStore, Settings};

pub const TEST_DIMENSION: usize = 256;

/// Deterministic bag-of-words embedder: each token hashes to one dimension,
/// the vector is L2-normalized. Texts sharing tokens land close together,
/// which is all the planner tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: TEST_DIMENSION,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let slot = fnv1a(token) as usize % self.dimension;
            vector[slot] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// FNV-1a, so hashing stays stable across runs and platforms.
fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// A provider whose failures can be toggled, for exercising the pending
/// state and the retry sweep.
pub struct FlakyEmbedder {
    inner: HashEmbedder,
    failing: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new(failing: bool) -> Self {
        Self {
            inner: HashEmbedder::new(),
            failing: AtomicBool::new(failing),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EmbeddingProvider for FlakyEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Generation(
                "embedding service unreachable".to_string(),
            ));
        }
        self.inner.embed_batch(texts)
    }
}

/// Route store logs through the test writer so `--nocapture` shows them.
/// Safe to call from every test; only the first installation wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.embedding.dimension = TEST_DIMENSION;
    settings
}

pub fn test_store() -> RetrievalStore {
    init_tracing();
    RetrievalStore::new(test_settings(), Arc::new(HashEmbedder::new()))
        .expect("store construction should succeed")
}

pub fn flaky_store(failing: bool) -> (RetrievalStore, Arc<FlakyEmbedder>) {
    init_tracing();
    let provider = Arc::new(FlakyEmbedder::new(failing));
    let store = RetrievalStore::new(test_settings(), provider.clone())
        .expect("store construction should succeed");
    (store, provider)
}
