pub mod error;
pub mod ids;

pub use error::{Error, ErrorCode, Result};
pub use ids::{entity_id, memory_id, prefixed_id};

/// Dimensionality of the sentence-embedding space used throughout the
/// service (all-MiniLM-L6-v2).
pub const EMBEDDING_DIM: usize = 384;
