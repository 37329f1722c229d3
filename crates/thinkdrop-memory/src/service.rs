use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thinkdrop_common::{EMBEDDING_DIM, Error, Result, memory_id};
use thinkdrop_db::{
    Entity, ListPage, ListQuery, MemoryRecord, MemoryStore, NewEntity, NewMemoryRecord,
    RecordType, SortKey, SortOrder, VectorFilters,
};
use thinkdrop_embed::Embedder;
use tracing::debug;

/// Longest accepted `text`, after trim.
const MAX_TEXT_CHARS: usize = 10_000;
/// Entities beyond this cap are silently dropped.
const MAX_ENTITIES: usize = 100;
const DEFAULT_USER: &str = "default_user";
const DEFAULT_SEARCH_LIMIT: usize = 10;
const DEFAULT_LIST_LIMIT: usize = 50;

/// Request-scoped caller context, resolved from the envelope.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message_count: Option<u32>,
    #[serde(default)]
    pub has_history: Option<bool>,
}

impl RequestContext {
    fn resolve_user(&self, payload_user: Option<&str>) -> String {
        self.user_id
            .as_deref()
            .or(payload_user)
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_USER)
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePayload {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub entities: Vec<NewEntity>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    pub embedding_ms: u64,
    pub db_insert_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    pub memory_id: String,
    pub stored: bool,
    pub entities: usize,
    pub embedding_dimensions: usize,
    pub timings: Timings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
    #[serde(default)]
    pub max_age_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub similarity: f32,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    pub memory_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub entities: Option<Vec<NewEntity>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub extracted_text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPayload {
    #[serde(default, rename = "type")]
    pub record_type: Option<String>,
    #[serde(default)]
    pub sort: Option<SortKey>,
    #[serde(default)]
    pub order: Option<SortOrder>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveOutcome {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub entities: Vec<Entity>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub memory_id: String,
    pub deleted: bool,
}

/// Orchestrates the user-memory read and write paths over the store and the
/// embedder. Embeddings are always produced before any database work begins.
pub struct MemoryService {
    store: Arc<MemoryStore>,
    embedder: Arc<Embedder>,
    default_min_similarity: f32,
    default_max_age_days: u32,
}

impl MemoryService {
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<Embedder>,
        default_min_similarity: f32,
        default_max_age_days: u32,
    ) -> Self {
        Self {
            store,
            embedder,
            default_min_similarity,
            default_max_age_days,
        }
    }

    pub fn store_handle(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    pub async fn store(&self, payload: StorePayload, ctx: &RequestContext) -> Result<StoreOutcome> {
        let started = Instant::now();

        let text = validate_text(&payload.text)?;
        let user_id = ctx.resolve_user(payload.user_id.as_deref());
        let id = memory_id();
        let record_type = payload
            .record_type
            .as_deref()
            .map(RecordType::from_str)
            .unwrap_or(RecordType::UserMemory);
        let entities = normalize_entities(payload.entities);

        let embed_started = Instant::now();
        let embedding = self
            .embedder
            .embed(&text)
            .await
            .map_err(|e| match e {
                Error::InvalidRequest(msg) => Error::InvalidRequest(msg),
                other => Error::Embedding(other.to_string()),
            })?;
        let embedding_ms = embed_started.elapsed().as_millis() as u64;

        let insert_started = Instant::now();
        let record = self.store.insert(NewMemoryRecord {
            id: id.clone(),
            user_id,
            record_type,
            source_text: text,
            metadata: payload.metadata.unwrap_or_else(|| serde_json::json!({})),
            screenshot: payload.screenshot,
            extracted_text: payload.extracted_text,
            embedding: Some(embedding),
            created_at: None,
        })?;
        let inserted_entities = self.store.insert_entities(&record.id, &entities)?;
        let db_insert_ms = insert_started.elapsed().as_millis() as u64;

        debug!("stored memory {id} with {inserted_entities} entities");
        Ok(StoreOutcome {
            memory_id: id,
            stored: true,
            entities: inserted_entities,
            embedding_dimensions: EMBEDDING_DIM,
            timings: Timings {
                embedding_ms,
                db_insert_ms,
                total_ms: started.elapsed().as_millis() as u64,
            },
        })
    }

    pub async fn search(
        &self,
        payload: SearchPayload,
        ctx: &RequestContext,
    ) -> Result<Vec<SearchResult>> {
        let query = payload.query.trim().to_string();
        if query.is_empty() {
            return Err(Error::InvalidRequest("search query cannot be empty".into()));
        }

        let user_id = ctx.resolve_user(payload.user_id.as_deref());
        let limit = payload.limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, 200);
        let min_similarity = payload.min_similarity.unwrap_or(self.default_min_similarity);
        let max_age_days = payload.max_age_days.unwrap_or(self.default_max_age_days);

        let filters = VectorFilters {
            record_type: payload.record_type.as_deref().map(RecordType::from_str),
            session_id: payload
                .session_id
                .or_else(|| ctx.session_id.clone())
                .filter(|s| !s.trim().is_empty()),
            created_after: (max_age_days > 0)
                .then(|| Utc::now() - Duration::days(i64::from(max_age_days))),
        };

        let query_vec = self.embedder.embed(&query).await?;

        // Overshoot the page so the similarity floor doesn't leave it short.
        let hits = self
            .store
            .vector_search(&user_id, &query_vec, limit * 2, &filters)?;

        let mut results = Vec::new();
        for hit in hits {
            if hit.similarity < min_similarity {
                continue;
            }
            if results.len() == limit {
                break;
            }
            let entities = self.store.list_entities(&hit.record.id)?;
            results.push(SearchResult {
                record: strip_embedding(hit.record),
                similarity: hit.similarity,
                entities,
            });
        }
        Ok(results)
    }

    pub fn retrieve(&self, id: &str, ctx: &RequestContext) -> Result<RetrieveOutcome> {
        let user_id = ctx.resolve_user(None);
        let record = self
            .store
            .get(id, &user_id)?
            .ok_or_else(|| Error::NotFound(format!("memory {id} not found")))?;
        let entities = self.store.list_entities(id)?;
        Ok(RetrieveOutcome {
            record: strip_embedding(record),
            entities,
        })
    }

    /// Replace fields on an existing record. The embedding is regenerated
    /// only when `text` actually changed; `created_at` survives the rewrite.
    pub async fn update(
        &self,
        payload: UpdatePayload,
        ctx: &RequestContext,
    ) -> Result<RetrieveOutcome> {
        let user_id = ctx.resolve_user(None);
        let existing = self
            .store
            .get(&payload.memory_id, &user_id)?
            .ok_or_else(|| Error::NotFound(format!("memory {} not found", payload.memory_id)))?;

        let (text, embedding) = match payload.text {
            Some(new_text) => {
                let new_text = validate_text(&new_text)?;
                if new_text == existing.source_text {
                    (existing.source_text.clone(), existing.embedding.clone())
                } else {
                    let vector = self.embedder.embed(&new_text).await?;
                    (new_text, Some(vector))
                }
            }
            None => (existing.source_text.clone(), existing.embedding.clone()),
        };

        let entities = payload.entities.map(normalize_entities);
        let replacement = NewMemoryRecord {
            id: existing.id.clone(),
            user_id: existing.user_id.clone(),
            record_type: existing.record_type.clone(),
            source_text: text,
            metadata: payload.metadata.unwrap_or(existing.metadata),
            screenshot: payload.screenshot.or(existing.screenshot),
            extracted_text: payload.extracted_text.or(existing.extracted_text),
            embedding,
            created_at: Some(existing.created_at),
        };

        let updated = self.store.replace(replacement, entities.as_deref())?;
        let entities = self.store.list_entities(&updated.id)?;
        Ok(RetrieveOutcome {
            record: strip_embedding(updated),
            entities,
        })
    }

    /// Idempotent delete: removing an absent id still succeeds, reporting
    /// `deleted: false`.
    pub fn delete(&self, id: &str, ctx: &RequestContext) -> Result<DeleteOutcome> {
        let user_id = ctx.resolve_user(None);
        let deleted = self.store.delete(id, &user_id)?;
        Ok(DeleteOutcome {
            memory_id: id.to_string(),
            deleted,
        })
    }

    pub fn list(&self, payload: ListPayload, ctx: &RequestContext) -> Result<ListPage> {
        let user_id = ctx.resolve_user(None);
        let query = ListQuery {
            record_type: payload.record_type.as_deref().map(RecordType::from_str),
            sort: payload.sort.unwrap_or(SortKey::CreatedAt),
            order: payload.order.unwrap_or(SortOrder::Desc),
            limit: payload.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500),
            offset: payload.offset.unwrap_or(0),
        };
        let mut page = self.store.metadata_query(&user_id, &query)?;
        page.records = page.records.into_iter().map(strip_embedding).collect();
        Ok(page)
    }

    /// Most recent screen captures with their OCR text.
    pub fn recent_ocr(&self, limit: Option<usize>, ctx: &RequestContext) -> Result<ListPage> {
        self.list(
            ListPayload {
                record_type: Some("screen_capture".to_string()),
                sort: Some(SortKey::CreatedAt),
                order: Some(SortOrder::Desc),
                limit: Some(limit.unwrap_or(10)),
                offset: None,
            },
            ctx,
        )
    }
}

fn validate_text(raw: &str) -> Result<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(Error::InvalidRequest("text is required".into()));
    }
    if text.chars().count() > MAX_TEXT_CHARS {
        return Err(Error::InvalidRequest(format!(
            "text exceeds {MAX_TEXT_CHARS} characters"
        )));
    }
    Ok(text.to_string())
}

/// Drop malformed entities and cap the list; invariant 3 (lowercased
/// normalised value) is enforced at insert time by the store.
fn normalize_entities(entities: Vec<NewEntity>) -> Vec<NewEntity> {
    entities
        .into_iter()
        .filter(|e| !e.entity_kind.trim().is_empty() && !e.value.trim().is_empty())
        .take(MAX_ENTITIES)
        .collect()
}

/// Wire responses never carry the raw vector.
fn strip_embedding(mut record: MemoryRecord) -> MemoryRecord {
    record.embedding = None;
    record
}
