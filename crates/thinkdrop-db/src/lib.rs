pub mod ann;
pub mod context_rules;
pub mod database;
pub mod memory_store;
pub mod migrations;
pub mod records;
pub mod skill_prompts;
pub mod skill_registry;

pub use ann::AnnIndex;
pub use context_rules::{ContextRule, ContextRuleStore, ContextType, NewContextRule};
pub use database::Database;
pub use memory_store::MemoryStore;
pub use records::{
    Entity, ListPage, ListQuery, MemoryRecord, NewEntity, NewMemoryRecord, RecordType, SearchHit,
    SortKey, SortOrder, StoreStats, VectorFilters,
};
pub use skill_prompts::{NewSkillPrompt, SkillPrompt, SkillPromptStore};
pub use skill_registry::{InstalledSkill, NewSkill, SkillExecType, SkillRegistry};

/// Cosine similarity between two equal-length vectors.
///
/// Returns 0.0 for mismatched lengths or zero-norm inputs, which keeps
/// degenerate rows out of search results instead of poisoning the sort.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        bytes.extend(v.to_le_bytes());
    }
    bytes
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> thinkdrop_common::Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(thinkdrop_common::Error::Database(
            "invalid embedding blob length".into(),
        ));
    }

    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(out)
}
