//! Vector embedding abstraction layer.
//!
//! Provides a trait-based interface for generating text embeddings
//! used by the memory store for semantic similarity search.
//!
//! The default implementation is [`HashingEmbeddingProvider`]: a
//! deterministic bag-of-words projection that needs no model download and
//! keeps recall reproducible across runs. Stub and random providers are
//! provided for tests, and [`CachedEmbeddingProvider`] memoizes any provider.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::config::RetrievalConfig;
use crate::error::{MemoryError, Result};
use crate::types::Embedding;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Generate vector embeddings from text.
///
/// Implementations must be `Send + Sync` for use from async contexts.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string.
    ///
    /// Returns a vector of `dimensions()` floats.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::Embedding`] if the provider fails to
    /// produce an embedding.
    fn embed(&self, text: &str) -> Result<Embedding>;

    /// Embed a batch of texts.
    ///
    /// Default implementation calls `embed` in a loop.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding in the batch fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// A human-readable name for the provider.
    fn model_name(&self) -> &str;
}

/// Build the provider named in `retrieval.embedding_provider`, wrapped in a
/// cache when `embedding_cache_size > 0`.
///
/// # Errors
///
/// Returns [`MemoryError::Config`] for an unknown provider name or zero
/// dimensions.
pub fn provider_from_config(config: &RetrievalConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let dims = config.embedding_dimensions;
    if dims == 0 {
        return Err(MemoryError::Config(
            "retrieval.embedding_dimensions must be positive".to_string(),
        ));
    }
    let base: Arc<dyn EmbeddingProvider> = match config.embedding_provider.as_str() {
        "hashing" => Arc::new(HashingEmbeddingProvider::new(dims)),
        "stub" => Arc::new(StubEmbeddingProvider::new(dims)),
        "random" => Arc::new(RandomEmbeddingProvider::new(dims)),
        other => {
            return Err(MemoryError::Config(format!(
                "unknown embedding provider: '{other}'"
            )));
        }
    };
    match NonZeroUsize::new(config.embedding_cache_size) {
        Some(capacity) => Ok(Arc::new(CachedEmbeddingProvider::new(base, capacity))),
        None => Ok(base),
    }
}

// ---------------------------------------------------------------------------
// Cosine similarity
// ---------------------------------------------------------------------------

/// Compute the cosine similarity between two embedding vectors.
///
/// Returns a value in \[-1.0, 1.0\].  Returns `0.0` if either vector
/// has zero magnitude or the dimensions differ.
#[must_use]
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> f32 {
    a.cosine_similarity(b)
}

// ---------------------------------------------------------------------------
// Hashing provider (default)
// ---------------------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "am", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can",
    "do", "for", "from", "had", "has", "have", "he", "her", "his", "i", "if", "in", "into", "is",
    "it", "its", "me", "my", "myself", "of", "on", "or", "our", "she", "so", "that", "the",
    "their", "them", "there", "these", "they", "this", "to", "was", "we", "were", "what", "when",
    "which", "who", "will", "with", "you", "your",
];

/// Deterministic feature-hashing embedder.
///
/// Text is lowercased and split on non-alphanumeric characters; stopwords
/// and one-letter tokens are dropped, a trailing plural `s` is stripped,
/// and each remaining token adds a signed unit to the bucket chosen by its
/// FNV-1a hash. The result is L2-normalized.
pub struct HashingEmbeddingProvider {
    dims: usize,
}

impl HashingEmbeddingProvider {
    /// Create a hashing provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dims: dimensions.max(1),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
            .map(str::to_lowercase)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .map(|t| {
                if t.len() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                    t[..t.len() - 1].to_string()
                } else {
                    t
                }
            })
    }
}

impl Default for HashingEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    #[allow(clippy::cast_possible_truncation)]
    fn embed(&self, text: &str) -> Result<Embedding> {
        let mut v = vec![0.0_f32; self.dims];
        for token in Self::tokens(text) {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let mag: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag >= f32::EPSILON {
            for x in &mut v {
                *x /= mag;
            }
        }
        Ok(Embedding(v))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "fnv-feature-hashing"
    }
}

// ---------------------------------------------------------------------------
// Stub / zero-cost provider (for tests)
// ---------------------------------------------------------------------------

/// A stub embedding provider that returns zero-vectors.
///
/// Every similarity against a zero vector is 0.0, so this is only useful
/// for tests that don't exercise similarity.
pub struct StubEmbeddingProvider {
    dims: usize,
}

impl StubEmbeddingProvider {
    /// Create a new stub provider with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl Default for StubEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EmbeddingProvider for StubEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        Ok(Embedding(vec![0.0; self.dims]))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "stub-zero-vector"
    }
}

// ---------------------------------------------------------------------------
// Normalized random provider (for integration testing)
// ---------------------------------------------------------------------------

/// An embedding provider that returns random unit-length vectors.
///
/// Useful for tests that need non-zero, diverse embeddings.
pub struct RandomEmbeddingProvider {
    dims: usize,
}

impl RandomEmbeddingProvider {
    /// Create a new random provider.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dims: dimensions }
    }
}

impl EmbeddingProvider for RandomEmbeddingProvider {
    fn embed(&self, _text: &str) -> Result<Embedding> {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let raw: Vec<f32> = (0..self.dims).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mag: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if mag < f32::EPSILON {
            return Ok(Embedding(vec![0.0; self.dims]));
        }
        Ok(Embedding(raw.iter().map(|x| x / mag).collect()))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        "random-unit-vector"
    }
}

// ---------------------------------------------------------------------------
// LRU cache decorator
// ---------------------------------------------------------------------------

/// Memoizes another provider's embeddings by exact text.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Embedding>>,
}

impl CachedEmbeddingProvider {
    /// Wrap `inner` with an LRU cache holding up to `capacity` entries.
    #[must_use]
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl EmbeddingProvider for CachedEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Embedding> {
        if let Some(hit) = self.cache.lock().get(text) {
            return Ok(hit.clone());
        }
        let embedding = self.inner.embed(text)?;
        self.cache.lock().put(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
