use std::collections::HashMap;

use sha2::{Digest, Sha256};
use thinkdrop_common::{EMBEDDING_DIM, Result};

use crate::backend::EmbeddingBackend;

/// Dimensions reserved at the tail of the vector for global text features.
const FEATURE_DIMS: usize = 20;
const TOKEN_DIMS: usize = EMBEDDING_DIM - FEATURE_DIMS;

/// Deterministic stand-in embedding used when the real model fails at
/// runtime. Semantic quality is limited, but identical inputs always map to
/// identical unit-length vectors, so the rest of the pipeline keeps working.
pub fn fallback_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];

    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut frequencies: HashMap<&str, usize> = HashMap::new();
    for token in &tokens {
        *frequencies.entry(token.as_str()).or_insert(0) += 1;
    }

    let token_count = tokens.len().max(1);
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (position, token) in tokens.iter().enumerate() {
        // First occurrence decides the position weight for a token.
        if seen.contains_key(token.as_str()) {
            continue;
        }
        seen.insert(token.as_str(), position);

        let hash = token_hash(token);
        let frequency = frequencies[token.as_str()] as f32;
        let relative_position = (position as f32 + 1.0) / token_count as f32;
        let weight = frequency * relative_position;

        // Spread each token across 4 dimensions drawn from its hash bits.
        for k in 0..4 {
            let bits = (hash >> (k * 16)) & 0xFFFF;
            let dim = (bits as usize) % TOKEN_DIMS;
            let sign = if (hash >> (60 + k)) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = ((bits % 1000) as f32 / 1000.0) + 0.1;
            vector[dim] += sign * weight * magnitude;
        }
    }

    // Tail dimensions carry bounded trig features of gross text shape.
    let text_len = text.len() as f32;
    let word_count = tokens.len() as f32;
    let avg_word_len = if tokens.is_empty() {
        0.0
    } else {
        tokens.iter().map(|t| t.len() as f32).sum::<f32>() / word_count
    };

    // Kept small so token overlap, not gross shape, dominates similarity.
    for i in 0..FEATURE_DIMS {
        let scale = (i + 1) as f32;
        let feature = match i % 3 {
            0 => (text_len * 0.01 * scale).sin(),
            1 => (word_count * 0.1 * scale).cos(),
            _ => (avg_word_len * 0.1 * scale).sin(),
        };
        vector[TOKEN_DIMS + i] = 0.1 * feature;
    }

    l2_normalize(&mut vector);
    vector
}

fn token_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().expect("digest has at least 8 bytes"))
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    } else {
        // Degenerate input (empty text); fix a stable unit vector.
        vector.fill(0.0);
        vector[0] = 1.0;
    }
}

/// Backend wrapper around the deterministic fallback. Used directly in tests
/// and as the degraded-mode encoder.
pub struct FallbackBackend;

impl EmbeddingBackend for FallbackBackend {
    fn name(&self) -> &str {
        "deterministic-fallback"
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(fallback_embedding(text))
    }
}
