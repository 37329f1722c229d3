pub mod backend;
pub mod cache;
pub mod embedder;
pub mod fallback;

pub use backend::{EmbeddingBackend, MiniLmBackend};
pub use cache::{CacheStats, EmbeddingCache};
pub use embedder::{Embedder, EmbedderStats};
pub use fallback::{FallbackBackend, fallback_embedding};
pub use thinkdrop_common::EMBEDDING_DIM;
