use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use serde::Deserialize;
use thinkdrop_common::{Error, Result};
use thinkdrop_db::{NewContextRule, NewSkill, NewSkillPrompt};
use thinkdrop_memory::{ListPayload, QueryClassifier, SearchPayload, StorePayload, UpdatePayload};
use tracing::warn;

use crate::auth;
use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::state::SharedState;

/// JSON bodies above this size are rejected with `PAYLOAD_TOO_LARGE`.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
/// Soft deadline for one request.
const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Every action the gateway dispatches.
pub const ACTIONS: &[&str] = &[
    "memory.store",
    "memory.search",
    "memory.retrieve",
    "memory.update",
    "memory.delete",
    "memory.list",
    "memory.classify-conversational-query",
    "memory.debug-embedding",
    "memory.health-check",
    "memory.getRecentOcr",
    "skill-prompts.store",
    "skill-prompts.search",
    "context-rules.set",
    "context-rules.get",
    "context-rules.list",
    "context-rules.delete",
    "skills.install",
    "skills.list",
    "skills.get",
    "skills.remove",
];

/// POST /{action} — bearer check, envelope validation, then dispatch.
pub async fn dispatch(
    State(state): State<SharedState>,
    Path(action): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let started = Instant::now();

    // 1. Bearer token. The envelope is not parsed yet, so failures echo an
    // empty requestId.
    if let Err(e) = auth::authorize(&headers, &state.config.server.api_keys) {
        warn!("unauthorized request for {action} from {addr}");
        return finish(&state, &action, "", &started, Err(e));
    }

    // 2. Body size and envelope shape.
    if body.len() > MAX_BODY_BYTES {
        let err = Error::PayloadTooLarge(format!(
            "body is {} bytes, limit {MAX_BODY_BYTES}",
            body.len()
        ));
        return finish(&state, &action, "", &started, Err(err));
    }
    let envelope: RequestEnvelope = match serde_json::from_slice(&body) {
        Ok(env) => env,
        Err(e) => {
            let err = Error::InvalidRequest(format!("malformed envelope: {e}"));
            return finish(&state, &action, "", &started, Err(err));
        }
    };
    let request_id = envelope.request_id.clone();
    if let Err(e) = envelope.validate(&action) {
        return finish(&state, &action, &request_id, &started, Err(e));
    }

    // 3. Action handler under the soft deadline.
    let result = match tokio::time::timeout(REQUEST_DEADLINE, handle_action(&state, &envelope))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Internal("request deadline exceeded".into())),
    };

    finish(&state, &action, &request_id, &started, result)
}

fn finish(
    state: &SharedState,
    action: &str,
    request_id: &str,
    started: &Instant,
    result: Result<serde_json::Value>,
) -> axum::response::Response {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    state.metrics.record(action, elapsed_ms, result.is_err());

    match result {
        Ok(data) => {
            let body = ResponseEnvelope::ok(action, request_id, data, elapsed_ms);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let body = ResponseEnvelope::failure(action, request_id, &e, elapsed_ms);
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_action(
    state: &SharedState,
    envelope: &RequestEnvelope,
) -> Result<serde_json::Value> {
    let ctx = &envelope.context;
    match envelope.action.as_str() {
        "memory.store" => {
            let payload: StorePayload = envelope.parse_payload()?;
            let outcome = state.service.store(payload, ctx).await?;
            to_value(outcome)
        }
        "memory.search" => {
            let payload: SearchPayload = envelope.parse_payload()?;
            let query = payload.query.clone();
            let results = state.service.search(payload, ctx).await?;
            Ok(serde_json::json!({
                "query": query,
                "total": results.len(),
                "results": results,
            }))
        }
        "memory.retrieve" => {
            let payload: MemoryIdPayload = envelope.parse_payload()?;
            let outcome = state.service.retrieve(&payload.memory_id, ctx)?;
            to_value(outcome)
        }
        "memory.update" => {
            let payload: UpdatePayload = envelope.parse_payload()?;
            let outcome = state.service.update(payload, ctx).await?;
            to_value(outcome)
        }
        "memory.delete" => {
            let payload: MemoryIdPayload = envelope.parse_payload()?;
            let outcome = state.service.delete(&payload.memory_id, ctx)?;
            to_value(outcome)
        }
        "memory.list" => {
            let payload: ListPayload = envelope.parse_payload()?;
            let page = state.service.list(payload, ctx)?;
            to_value(page)
        }
        "memory.classify-conversational-query" => {
            let payload: QueryPayload = envelope.parse_payload()?;
            let classification = QueryClassifier::classify(&payload.query, ctx);
            to_value(classification)
        }
        "memory.debug-embedding" => {
            let payload: TextPayload = envelope.parse_payload()?;
            debug_embedding(state, &payload.text).await
        }
        "memory.health-check" => Ok(build_health(state)),
        "memory.getRecentOcr" => {
            let payload: RecentOcrPayload = envelope.parse_payload()?;
            let page = state.service.recent_ocr(payload.limit, ctx)?;
            to_value(page)
        }
        "skill-prompts.store" => {
            let payload: SkillPromptPayload = envelope.parse_payload()?;
            let embedding = state.service.embedder().embed(&payload.prompt_text).await?;
            let prompt = state.skill_prompts.insert(NewSkillPrompt {
                tags: payload.tags,
                prompt_text: payload.prompt_text,
                embedding: Some(embedding),
            })?;
            Ok(serde_json::json!({ "promptId": prompt.id, "stored": true }))
        }
        "skill-prompts.search" => {
            let payload: QueryPayload = envelope.parse_payload()?;
            let query_vec = state.service.embedder().embed(&payload.query).await?;
            let matches = state
                .skill_prompts
                .semantic_search(&query_vec, payload.limit.unwrap_or(5))?;
            let mut results = Vec::new();
            for (prompt, similarity) in matches {
                state.skill_prompts.increment_hit(&prompt.id)?;
                results.push(serde_json::json!({
                    "id": prompt.id,
                    "tags": prompt.tags,
                    "promptText": prompt.prompt_text,
                    "hitCount": prompt.hit_count + 1,
                    "similarity": similarity,
                }));
            }
            Ok(serde_json::json!({ "total": results.len(), "results": results }))
        }
        "context-rules.set" => {
            let payload: NewContextRule = envelope.parse_payload()?;
            let rule = state.context_rules.set(payload)?;
            to_value(rule)
        }
        "context-rules.get" => {
            let payload: ContextLookupPayload = envelope.parse_payload()?;
            let rules = state
                .context_rules
                .lookup(payload.context_type, &payload.context_key)?;
            Ok(serde_json::json!({ "total": rules.len(), "rules": rules }))
        }
        "context-rules.list" => {
            let rules = state.context_rules.list()?;
            Ok(serde_json::json!({ "total": rules.len(), "rules": rules }))
        }
        "context-rules.delete" => {
            let payload: IdPayload = envelope.parse_payload()?;
            let deleted = state.context_rules.delete(&payload.id)?;
            Ok(serde_json::json!({ "deleted": deleted }))
        }
        "skills.install" => {
            let payload: NewSkill = envelope.parse_payload()?;
            let skill = state.skills.register(payload)?;
            to_value(skill)
        }
        "skills.list" => {
            let skills = state.skills.list()?;
            Ok(serde_json::json!({ "total": skills.len(), "skills": skills }))
        }
        "skills.get" => {
            let payload: NamePayload = envelope.parse_payload()?;
            let skill = state
                .skills
                .get(&payload.name)?
                .ok_or_else(|| Error::NotFound(format!("skill {} not found", payload.name)))?;
            to_value(skill)
        }
        "skills.remove" => {
            let payload: NamePayload = envelope.parse_payload()?;
            let removed = state.skills.remove(&payload.name)?;
            Ok(serde_json::json!({ "removed": removed }))
        }
        other => Err(Error::InvalidRequest(format!("unknown action: {other}"))),
    }
}

async fn debug_embedding(state: &SharedState, text: &str) -> Result<serde_json::Value> {
    let vector = state.service.embedder().embed(text).await?;
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let stats = state.service.embedder().stats();
    Ok(serde_json::json!({
        "dimensions": vector.len(),
        "norm": norm,
        "sample": &vector[..8.min(vector.len())],
        "backend": stats.backend,
        "cacheStats": stats.cache,
        "fallbackCount": stats.fallback_count,
    }))
}

/// Aggregate health document shared by `memory.health-check` and
/// `GET /service.health`.
pub fn build_health(state: &SharedState) -> serde_json::Value {
    let store_stats = state
        .service
        .store_handle()
        .stats()
        .map(|s| serde_json::to_value(s).unwrap_or(serde_json::Value::Null))
        .unwrap_or(serde_json::Value::Null);

    serde_json::json!({
        "status": "ok",
        "service": crate::envelope::SERVICE_NAME,
        "uptimeSecs": state.uptime_secs(),
        "store": store_stats,
        "embedder": state.service.embedder().stats(),
        "monitor": state.monitor.as_ref().map(|m| m.counters()),
        "retention": state.retention.as_ref().map(|r| r.counters()),
        "actions": state.metrics.snapshot(),
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(format!("serialization failed: {e}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemoryIdPayload {
    memory_id: String,
}

#[derive(Deserialize)]
struct QueryPayload {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct TextPayload {
    text: String,
}

#[derive(Deserialize)]
struct RecentOcrPayload {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkillPromptPayload {
    #[serde(default)]
    tags: Vec<String>,
    prompt_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextLookupPayload {
    context_type: thinkdrop_db::ContextType,
    context_key: String,
}

#[derive(Deserialize)]
struct IdPayload {
    id: String,
}

#[derive(Deserialize)]
struct NamePayload {
    name: String,
}
