use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use thinkdrop_common::{EMBEDDING_DIM, Error, Result};
use tracing::warn;

use crate::backend::EmbeddingBackend;
use crate::cache::{CacheStats, EmbeddingCache};
use crate::fallback::fallback_embedding;

/// Unit-norm tolerance accepted from a backend before renormalising.
const NORM_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedderStats {
    pub backend: String,
    pub cache: CacheStats,
    pub fallback_count: u64,
}

/// The embedding pipeline: input validation, cache lookup, backend encode
/// (off the async runtime's worker threads), deterministic fallback on
/// backend failure, and output validation.
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: EmbeddingCache,
    fallback_count: AtomicU64,
}

impl Embedder {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, cache_size: usize, cache_ttl: Duration) -> Self {
        Self {
            backend,
            cache: EmbeddingCache::new(cache_size, cache_ttl),
            fallback_count: AtomicU64::new(0),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Embed one text. Always yields a valid 384-dim unit vector (real or
    /// fallback); the only failures are invalid input and a fallback that
    /// itself produced garbage, which cannot happen for finite input.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRequest("cannot embed empty text".into()));
        }

        if let Some(cached) = self.cache.get(text) {
            return Ok(cached);
        }

        let backend = Arc::clone(&self.backend);
        let owned = text.to_string();
        let encoded = tokio::task::spawn_blocking(move || backend.encode(&owned))
            .await
            .map_err(|e| Error::Internal(format!("embedding task panicked: {e}")))?;

        let vector = match encoded {
            Ok(vector) => vector,
            Err(e) => {
                warn!("embedding backend failed, using deterministic fallback: {e}");
                self.fallback_count.fetch_add(1, Ordering::Relaxed);
                fallback_embedding(text)
            }
        };

        let vector = validate(vector)?;
        self.cache.put(text, vector.clone());
        Ok(vector)
    }

    /// Embed many texts, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallback_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            backend: self.backend.name().to_string(),
            cache: self.cache.stats(),
            fallback_count: self.fallback_count(),
        }
    }
}

/// Every vector leaving the embedder satisfies the stored-record invariant:
/// exactly 384 finite components at unit length.
fn validate(vector: Vec<f32>) -> Result<Vec<f32>> {
    if vector.len() != EMBEDDING_DIM {
        return Err(Error::Embedding(format!(
            "backend produced {} dimensions, expected {EMBEDDING_DIM}",
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::Embedding("backend produced non-finite values".into()));
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return Err(Error::Embedding("backend produced a zero vector".into()));
    }
    if (norm - 1.0).abs() > NORM_TOLERANCE {
        return Ok(vector.into_iter().map(|v| v / norm).collect());
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackBackend;
    use std::sync::atomic::AtomicUsize;

    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl EmbeddingBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(fallback_embedding(text))
        }
    }

    struct FailingBackend;

    impl EmbeddingBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("model exploded".into()))
        }
    }

    struct ShortBackend;

    impl EmbeddingBackend for ShortBackend {
        fn name(&self) -> &str {
            "short"
        }

        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn embedder(backend: Arc<dyn EmbeddingBackend>) -> Embedder {
        Embedder::new(backend, 100, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn embed_returns_valid_unit_vector() {
        let e = embedder(Arc::new(FallbackBackend));
        let v = e.embed("a note about a meeting").await.expect("embed");
        assert_eq!(v.len(), EMBEDDING_DIM);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn identical_text_hits_the_cache() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let e = embedder(backend.clone());

        let first = e.embed("same text").await.expect("embed");
        let second = e.embed("same text").await.expect("embed");
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        let stats = e.cache_stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn normalised_key_deduplicates_variants() {
        let backend = Arc::new(CountingBackend {
            calls: AtomicUsize::new(0),
        });
        let e = embedder(backend.clone());

        e.embed("Hello World").await.expect("embed");
        e.embed("  hello world  ").await.expect("embed");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_input_is_invalid() {
        let e = embedder(Arc::new(FallbackBackend));
        let err = e.embed("   ").await.expect_err("should fail");
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn backend_failure_falls_back_deterministically() {
        let e = embedder(Arc::new(FailingBackend));
        let v = e.embed("degraded mode text").await.expect("fallback");
        assert_eq!(v, fallback_embedding("degraded mode text"));
        assert_eq!(e.fallback_count(), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_from_backend_is_an_error() {
        let e = embedder(Arc::new(ShortBackend));
        let err = e.embed("whatever").await.expect_err("should fail");
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let e = embedder(Arc::new(FallbackBackend));
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        let vectors = e.embed_batch(&texts).await.expect("batch");
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], fallback_embedding("alpha"));
        assert_eq!(vectors[2], fallback_embedding("gamma"));
    }
}
