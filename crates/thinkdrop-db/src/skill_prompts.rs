use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thinkdrop_common::{Error, Result, prefixed_id};

use crate::database::Database;
use crate::memory_store::parse_timestamp;
use crate::{blob_to_embedding, cosine_similarity, embedding_to_blob};

/// A reusable prompt snippet, semantically searchable in the same embedding
/// space as memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillPrompt {
    pub id: String,
    pub tags: Vec<String>,
    pub prompt_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSkillPrompt {
    pub tags: Vec<String>,
    pub prompt_text: String,
    pub embedding: Option<Vec<f32>>,
}

pub struct SkillPromptStore {
    db: Arc<Database>,
}

impl SkillPromptStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, prompt: NewSkillPrompt) -> Result<SkillPrompt> {
        if prompt.prompt_text.trim().is_empty() {
            return Err(Error::InvalidRequest("prompt text cannot be empty".into()));
        }

        let id = prefixed_id("sp");
        let now = Utc::now();
        let tags = prompt.tags.join(",");
        let blob = prompt.embedding.as_ref().map(|e| embedding_to_blob(e));

        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO skill_prompts (id, tags, prompt_text, embedding, hit_count, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
            params![
                id,
                tags,
                prompt.prompt_text,
                blob,
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert skill prompt: {e}")))?;

        Ok(SkillPrompt {
            id,
            tags: prompt.tags,
            prompt_text: prompt.prompt_text,
            embedding: prompt.embedding,
            hit_count: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rank all embedded prompts by cosine similarity to the query vector.
    pub fn semantic_search(&self, query: &[f32], limit: usize) -> Result<Vec<(SkillPrompt, f32)>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, tags, prompt_text, embedding, hit_count, created_at, updated_at
                 FROM skill_prompts WHERE embedding IS NOT NULL",
            )
            .map_err(|e| Error::Database(format!("failed to prepare prompt search: {e}")))?;

        let rows = stmt
            .query_map([], row_to_prompt)
            .map_err(|e| Error::Database(format!("failed to search prompts: {e}")))?;

        let mut scored = Vec::new();
        for row in rows {
            let prompt = row.map_err(|e| Error::Database(format!("bad prompt row: {e}")))?;
            if let Some(embedding) = &prompt.embedding {
                let similarity = cosine_similarity(query, embedding);
                scored.push((prompt, similarity));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn get(&self, id: &str) -> Result<Option<SkillPrompt>> {
        let conn = self.db.connection()?;
        conn.query_row(
            "SELECT id, tags, prompt_text, embedding, hit_count, created_at, updated_at
             FROM skill_prompts WHERE id = ?",
            params![id],
            row_to_prompt,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to fetch prompt: {e}")))
    }

    pub fn increment_hit(&self, id: &str) -> Result<()> {
        let conn = self.db.connection()?;
        conn.execute(
            "UPDATE skill_prompts SET hit_count = hit_count + 1, updated_at = ? WHERE id = ?",
            params![Utc::now().to_rfc3339(), id],
        )
        .map_err(|e| Error::Database(format!("failed to bump prompt hit count: {e}")))?;
        Ok(())
    }
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<SkillPrompt> {
    let tags_raw: String = row.get(1)?;
    let tags = tags_raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    let blob: Option<Vec<u8>> = row.get(3)?;
    let embedding = blob
        .as_deref()
        .map(blob_to_embedding)
        .transpose()
        .map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
        })?;

    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;
    let hit_count: i64 = row.get(4)?;

    Ok(SkillPrompt {
        id: row.get(0)?,
        tags,
        prompt_text: row.get(2)?,
        embedding,
        hit_count: hit_count.max(0) as u64,
        created_at: parse_timestamp(&created_at).map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
        })?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinkdrop_common::EMBEDDING_DIM;

    fn store() -> SkillPromptStore {
        SkillPromptStore::new(Arc::new(Database::in_memory().expect("in-memory database")))
    }

    fn unit_vec(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[direction % EMBEDDING_DIM] = 1.0;
        v
    }

    #[test]
    fn insert_and_search_ranks_by_similarity() {
        let store = store();
        store
            .insert(NewSkillPrompt {
                tags: vec!["email".to_string(), "drafting".to_string()],
                prompt_text: "Draft a polite follow-up email".to_string(),
                embedding: Some(unit_vec(0)),
            })
            .expect("insert");
        store
            .insert(NewSkillPrompt {
                tags: vec!["code".to_string()],
                prompt_text: "Explain this stack trace".to_string(),
                embedding: Some(unit_vec(1)),
            })
            .expect("insert");

        let results = store.semantic_search(&unit_vec(0), 10).expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.prompt_text, "Draft a polite follow-up email");
        assert!(results[0].1 > results[1].1);
    }

    #[test]
    fn tags_round_trip_as_comma_joined() {
        let store = store();
        let prompt = store
            .insert(NewSkillPrompt {
                tags: vec!["a".to_string(), "b".to_string()],
                prompt_text: "tagged".to_string(),
                embedding: None,
            })
            .expect("insert");

        let fetched = store.get(&prompt.id).expect("get").expect("exists");
        assert_eq!(fetched.tags, vec!["a", "b"]);
    }

    #[test]
    fn empty_prompt_text_is_rejected() {
        let store = store();
        assert!(
            store
                .insert(NewSkillPrompt {
                    tags: Vec::new(),
                    prompt_text: "   ".to_string(),
                    embedding: None,
                })
                .is_err()
        );
    }

    #[test]
    fn hit_count_increments() {
        let store = store();
        let prompt = store
            .insert(NewSkillPrompt {
                tags: Vec::new(),
                prompt_text: "counted".to_string(),
                embedding: None,
            })
            .expect("insert");

        store.increment_hit(&prompt.id).expect("bump");
        store.increment_hit(&prompt.id).expect("bump");

        let fetched = store.get(&prompt.id).expect("get").expect("exists");
        assert_eq!(fetched.hit_count, 2);
    }
}
