use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use thinkdrop_common::{EMBEDDING_DIM, Error, Result, entity_id};
use tracing::{debug, info, warn};

use crate::ann::AnnIndex;
use crate::database::Database;
use crate::records::{
    Entity, ListPage, ListQuery, MemoryRecord, NewEntity, NewMemoryRecord, RecordType, SearchHit,
    StoreStats, VectorFilters,
};
use crate::{blob_to_embedding, cosine_similarity, embedding_to_blob};

/// How many extra candidates the ANN index is asked for, to absorb
/// post-filtering losses before the exact re-rank.
const ANN_OVERSHOOT: usize = 4;
const ANN_OVERSHOOT_FLOOR: usize = 50;

/// Primary record store: persistence plus cosine vector search.
///
/// The HNSW index accelerates unfiltered searches; filtered searches and any
/// search the index cannot satisfy fall back to an exact scan, so results
/// never depend on the index being present.
pub struct MemoryStore {
    db: Arc<Database>,
    ann: Mutex<AnnIndex>,
}

impl MemoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            ann: Mutex::new(AnnIndex::new(EMBEDDING_DIM)),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Insert a record. The ANN index is deferred: the row is marked for
    /// inclusion at the next rebuild rather than patched in place.
    pub fn insert(&self, record: NewMemoryRecord) -> Result<MemoryRecord> {
        if let Some(embedding) = &record.embedding
            && embedding.len() != EMBEDDING_DIM
        {
            return Err(Error::Database(format!(
                "embedding has dimension {}, expected {EMBEDDING_DIM}",
                embedding.len()
            )));
        }

        let now = Utc::now();
        let created_at = record.created_at.unwrap_or(now);
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| Error::Database(format!("failed to serialize metadata: {e}")))?;
        let embedding_blob = record.embedding.as_ref().map(|e| embedding_to_blob(e));

        {
            let conn = self.db.connection()?;
            conn.execute(
                "INSERT INTO memory (
                    id, user_id, type, source_text, metadata, screenshot,
                    extracted_text, embedding, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    record.user_id,
                    record.record_type.as_str(),
                    record.source_text,
                    metadata_json,
                    record.screenshot,
                    record.extracted_text,
                    embedding_blob,
                    created_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert record: {e}")))?;
        }

        if record.embedding.is_some() {
            self.mark_index_dirty()?;
        }

        Ok(MemoryRecord {
            id: record.id,
            user_id: record.user_id,
            record_type: record.record_type,
            source_text: record.source_text,
            metadata: record.metadata,
            screenshot: record.screenshot,
            extracted_text: record.extracted_text,
            embedding: record.embedding,
            created_at,
            updated_at: now,
        })
    }

    /// Insert entity rows for a record. A failing row is logged and skipped;
    /// the parent record stands regardless.
    pub fn insert_entities(&self, memory_id: &str, entities: &[NewEntity]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let conn = self.db.connection()?;
        let mut inserted = 0;

        for entity in entities {
            let entity_type = entity
                .entity_type
                .clone()
                .unwrap_or_else(|| entity.entity_kind.clone());
            let normalized = entity.value.to_lowercase();

            let result = conn.execute(
                "INSERT INTO memory_entities (
                    id, memory_id, entity, type, entity_type, normalized_value, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    entity_id(),
                    memory_id,
                    entity.value,
                    entity.entity_kind,
                    entity_type,
                    normalized,
                    now,
                ],
            );

            match result {
                Ok(_) => inserted += 1,
                Err(e) => {
                    warn!("skipping entity {:?} for {memory_id}: {e}", entity.value);
                }
            }
        }

        Ok(inserted)
    }

    pub fn get(&self, id: &str, user_id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.db.connection()?;
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM memory WHERE id = ? AND user_id = ?"),
            params![id, user_id],
            row_to_record,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to fetch record: {e}")))
    }

    /// Remove a record and its entities atomically. Idempotent: deleting a
    /// missing id succeeds and reports `false`.
    pub fn delete(&self, id: &str, user_id: &str) -> Result<bool> {
        let deleted = {
            let mut conn = self.db.connection()?;
            let tx = conn
                .transaction()
                .map_err(|e| Error::Database(format!("failed to begin delete: {e}")))?;

            tx.execute(
                "DELETE FROM memory_entities WHERE memory_id = ?",
                params![id],
            )
            .map_err(|e| Error::Database(format!("failed to delete entities: {e}")))?;
            let rows = tx
                .execute(
                    "DELETE FROM memory WHERE id = ? AND user_id = ?",
                    params![id, user_id],
                )
                .map_err(|e| Error::Database(format!("failed to delete record: {e}")))?;

            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit delete: {e}")))?;
            rows > 0
        };

        if deleted {
            self.mark_index_dirty()?;
        }
        Ok(deleted)
    }

    /// Replace a record in place, preserving `created_at`. The underlying
    /// store has no in-place UPDATE for vector columns, so this is a
    /// delete + reinsert under one transaction. Entities are replaced when
    /// `entities` is `Some`, otherwise carried over.
    pub fn replace(
        &self,
        record: NewMemoryRecord,
        entities: Option<&[NewEntity]>,
    ) -> Result<MemoryRecord> {
        let now = Utc::now();
        let created_at = record.created_at.unwrap_or(now);
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| Error::Database(format!("failed to serialize metadata: {e}")))?;
        let embedding_blob = record.embedding.as_ref().map(|e| embedding_to_blob(e));

        {
            let mut conn = self.db.connection()?;
            let tx = conn
                .transaction()
                .map_err(|e| Error::Database(format!("failed to begin replace: {e}")))?;

            let preserved: Vec<Entity> = if entities.is_none() {
                collect_entities(&tx, &record.id)?
            } else {
                Vec::new()
            };

            tx.execute(
                "DELETE FROM memory_entities WHERE memory_id = ?",
                params![record.id],
            )
            .map_err(|e| Error::Database(format!("failed to clear entities: {e}")))?;
            tx.execute("DELETE FROM memory WHERE id = ?", params![record.id])
                .map_err(|e| Error::Database(format!("failed to clear record: {e}")))?;

            tx.execute(
                "INSERT INTO memory (
                    id, user_id, type, source_text, metadata, screenshot,
                    extracted_text, embedding, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id,
                    record.user_id,
                    record.record_type.as_str(),
                    record.source_text,
                    metadata_json,
                    record.screenshot,
                    record.extracted_text,
                    embedding_blob,
                    created_at.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to reinsert record: {e}")))?;

            for entity in &preserved {
                tx.execute(
                    "INSERT INTO memory_entities (
                        id, memory_id, entity, type, entity_type, normalized_value, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        entity.id,
                        entity.memory_id,
                        entity.entity,
                        entity.entity_kind,
                        entity.entity_type,
                        entity.normalized_value,
                        entity.created_at.to_rfc3339(),
                    ],
                )
                .map_err(|e| Error::Database(format!("failed to restore entity: {e}")))?;
            }

            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit replace: {e}")))?;
        }

        if let Some(new_entities) = entities {
            self.insert_entities(&record.id, new_entities)?;
        }
        self.mark_index_dirty()?;

        Ok(MemoryRecord {
            id: record.id,
            user_id: record.user_id,
            record_type: record.record_type,
            source_text: record.source_text,
            metadata: record.metadata,
            screenshot: record.screenshot,
            extracted_text: record.extracted_text,
            embedding: record.embedding,
            created_at,
            updated_at: now,
        })
    }

    /// Top-`k` records by cosine similarity to `query`, filtered. Rows with
    /// no embedding are excluded. Results carry `1 - cosineDistance` and are
    /// sorted descending.
    pub fn vector_search(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
        filters: &VectorFilters,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != EMBEDDING_DIM {
            return Err(Error::Database(format!(
                "query vector has dimension {}, expected {EMBEDDING_DIM}",
                query.len()
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        self.ensure_index()?;

        let unfiltered = filters.record_type.is_none()
            && filters.session_id.is_none()
            && filters.created_after.is_none();

        if unfiltered {
            let want = k * ANN_OVERSHOOT + ANN_OVERSHOOT_FLOOR;
            let (candidates, indexed) = {
                let ann = self.ann_guard()?;
                (ann.search(query, want), ann.len())
            };
            if let Some(candidate_ids) = candidates {
                let mut hits = Vec::new();
                for id in candidate_ids {
                    if let Some(record) = self.get(&id, user_id)?
                        && let Some(embedding) = &record.embedding
                    {
                        let similarity = cosine_similarity(query, embedding);
                        hits.push(SearchHit { record, similarity });
                    }
                }
                // The candidate list spans all users; only trust it when it
                // yielded a full page (or exhausted the index) for this one.
                if hits.len() >= k.min(indexed) {
                    sort_hits(&mut hits);
                    hits.truncate(k);
                    return Ok(hits);
                }
                debug!("ANN candidates insufficient, falling back to scan");
            }
        }

        let mut hits = self.scan_search(user_id, query, filters)?;
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    /// Exact search path: scan the filtered rows and rank by cosine.
    fn scan_search(
        &self,
        user_id: &str,
        query: &[f32],
        filters: &VectorFilters,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM memory
                 WHERE user_id = ?1
                   AND embedding IS NOT NULL
                   AND (?2 IS NULL OR type = ?2)
                   AND (?3 IS NULL OR metadata LIKE '%' || ?3 || '%')
                   AND (?4 IS NULL OR datetime(created_at) >= datetime(?4))"
            ))
            .map_err(|e| Error::Database(format!("failed to prepare search: {e}")))?;

        let type_filter = filters.record_type.as_ref().map(|t| t.as_str().to_string());
        let cutoff = filters.created_after.map(|t| t.to_rfc3339());

        let rows = stmt
            .query_map(
                params![user_id, type_filter, filters.session_id, cutoff],
                row_to_record,
            )
            .map_err(|e| Error::Database(format!("failed to execute search: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            let record = row.map_err(|e| Error::Database(format!("bad search row: {e}")))?;
            if let Some(embedding) = &record.embedding {
                let similarity = cosine_similarity(query, embedding);
                hits.push(SearchHit { record, similarity });
            }
        }
        Ok(hits)
    }

    /// Structured listing with whitelisted sort keys and paging.
    pub fn metadata_query(&self, user_id: &str, query: &ListQuery) -> Result<ListPage> {
        let conn = self.db.connection()?;
        let type_filter = query.record_type.as_ref().map(|t| t.as_str().to_string());

        let total: i64 = conn
            .query_row(
                "SELECT count(*) FROM memory WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2)",
                params![user_id, type_filter],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to count records: {e}")))?;

        // Sort column and order come from closed enums, never from input.
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM memory
             WHERE user_id = ?1 AND (?2 IS NULL OR type = ?2)
             ORDER BY datetime({}) {}
             LIMIT ?3 OFFSET ?4",
            query.sort.column(),
            query.order.keyword(),
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare list: {e}")))?;

        let rows = stmt
            .query_map(
                params![
                    user_id,
                    type_filter,
                    query.limit as i64,
                    query.offset as i64
                ],
                row_to_record,
            )
            .map_err(|e| Error::Database(format!("failed to execute list: {e}")))?;

        let records = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect list rows: {e}")))?;

        Ok(ListPage {
            records,
            total: total as usize,
            limit: query.limit,
            offset: query.offset,
        })
    }

    pub fn list_entities(&self, memory_id: &str) -> Result<Vec<Entity>> {
        let conn = self.db.connection()?;
        collect_entities(&conn, memory_id)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.db.connection()?;

        let (total, user_memories, screen_captures, embedded): (i64, i64, i64, i64) = conn
            .query_row(
                "SELECT count(*),
                        count(*) FILTER (WHERE type = 'user_memory'),
                        count(*) FILTER (WHERE type = 'screen_capture'),
                        count(*) FILTER (WHERE embedding IS NOT NULL)
                 FROM memory",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .map_err(|e| Error::Database(format!("failed to compute stats: {e}")))?;

        let total_entities: i64 = conn
            .query_row("SELECT count(*) FROM memory_entities", [], |row| row.get(0))
            .map_err(|e| Error::Database(format!("failed to count entities: {e}")))?;

        let (oldest, newest): (Option<String>, Option<String>) = conn
            .query_row(
                "SELECT min(created_at), max(created_at) FROM memory",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| Error::Database(format!("failed to read age range: {e}")))?;

        Ok(StoreStats {
            total_records: total as usize,
            user_memories: user_memories as usize,
            screen_captures: screen_captures as usize,
            embedded_records: embedded as usize,
            total_entities: total_entities as usize,
            oldest_created_at: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest_created_at: newest.as_deref().map(parse_timestamp).transpose()?,
        })
    }

    /// Oldest and newest `created_at` across all records, if any exist.
    pub fn created_at_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let stats = self.stats()?;
        match (stats.oldest_created_at, stats.newest_created_at) {
            (Some(oldest), Some(newest)) => Ok(Some((oldest, newest))),
            _ => Ok(None),
        }
    }

    /// Range-delete everything created before `cutoff`, entities first.
    /// Returns the number of records removed. The caller follows up with
    /// `compact_index` / checkpoint / `rebuild_index` per the purge sequence.
    pub fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = {
            let mut conn = self.db.connection()?;
            let tx = conn
                .transaction()
                .map_err(|e| Error::Database(format!("failed to begin purge: {e}")))?;

            tx.execute(
                "DELETE FROM memory_entities WHERE memory_id IN (
                    SELECT id FROM memory WHERE datetime(created_at) < datetime(?)
                )",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| Error::Database(format!("failed to purge entities: {e}")))?;

            let rows = tx
                .execute(
                    "DELETE FROM memory WHERE datetime(created_at) < datetime(?)",
                    params![cutoff.to_rfc3339()],
                )
                .map_err(|e| Error::Database(format!("failed to purge records: {e}")))?;

            tx.commit()
                .map_err(|e| Error::Database(format!("failed to commit purge: {e}")))?;
            rows
        };

        if removed > 0 {
            self.mark_index_dirty()?;
        }
        info!("purged {removed} records created before {cutoff}");
        Ok(removed)
    }

    /// Drop the in-memory ANN graph; the next search rebuilds from scratch.
    pub fn compact_index(&self) -> Result<()> {
        let mut ann = self.ann_guard()?;
        *ann = AnnIndex::new(EMBEDDING_DIM);
        Ok(())
    }

    /// Rebuild the ANN index from every embedded row. Returns the number of
    /// vectors indexed; skipped (returns 0) when no embedded rows exist.
    pub fn rebuild_index(&self) -> Result<usize> {
        let rows = self.load_embedded_rows()?;
        let count = rows.len();
        self.ann_guard()?.rebuild(rows)?;
        Ok(count)
    }

    fn ensure_index(&self) -> Result<()> {
        let dirty = self.ann_guard()?.is_dirty();
        if dirty {
            self.rebuild_index()?;
        }
        Ok(())
    }

    fn load_embedded_rows(&self) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, embedding FROM memory WHERE embedding IS NOT NULL")
            .map_err(|e| Error::Database(format!("failed to prepare index load: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })
            .map_err(|e| Error::Database(format!("failed to load embeddings: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row.map_err(|e| Error::Database(format!("bad embedding row: {e}")))?;
            out.push((id, blob_to_embedding(&blob)?));
        }
        Ok(out)
    }

    fn mark_index_dirty(&self) -> Result<()> {
        self.ann_guard()?.mark_dirty();
        Ok(())
    }

    fn ann_guard(&self) -> Result<std::sync::MutexGuard<'_, AnnIndex>> {
        self.ann
            .lock()
            .map_err(|_| Error::Database("ANN index lock poisoned".into()))
    }
}

const RECORD_COLUMNS: &str = "id, user_id, type, source_text, metadata, screenshot, \
                              extracted_text, embedding, created_at, updated_at";

fn sort_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let type_str: String = row.get(2)?;

    let metadata_str: String = row.get(4)?;
    let metadata =
        serde_json::from_str(&metadata_str).unwrap_or(serde_json::Value::Object(Default::default()));

    let embedding_blob: Option<Vec<u8>> = row.get(7)?;
    let embedding = embedding_blob
        .as_deref()
        .map(blob_to_embedding)
        .transpose()
        .map_err(to_sql_error)?;

    let created_at_str: String = row.get(8)?;
    let updated_at_str: String = row.get(9)?;

    Ok(MemoryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        record_type: RecordType::from_str(&type_str),
        source_text: row.get(3)?,
        metadata,
        screenshot: row.get(5)?,
        extracted_text: row.get(6)?,
        embedding,
        created_at: parse_timestamp(&created_at_str).map_err(to_sql_error)?,
        updated_at: parse_timestamp(&updated_at_str).map_err(to_sql_error)?,
    })
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let created_at_str: String = row.get(6)?;
    Ok(Entity {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        entity: row.get(2)?,
        entity_kind: row.get(3)?,
        entity_type: row.get(4)?,
        normalized_value: row.get(5)?,
        created_at: parse_timestamp(&created_at_str).map_err(to_sql_error)?,
    })
}

fn collect_entities(conn: &Connection, memory_id: &str) -> Result<Vec<Entity>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, memory_id, entity, type, entity_type, normalized_value, created_at
             FROM memory_entities WHERE memory_id = ? ORDER BY datetime(created_at)",
        )
        .map_err(|e| Error::Database(format!("failed to prepare entity query: {e}")))?;

    let rows = stmt
        .query_map(params![memory_id], row_to_entity)
        .map_err(|e| Error::Database(format!("failed to query entities: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to collect entities: {e}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc));
    }
    Err(Error::Database(format!("invalid timestamp format: {raw}")))
}

fn to_sql_error(e: Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinkdrop_common::memory_id;

    fn store() -> MemoryStore {
        let db = Arc::new(Database::in_memory().expect("in-memory database"));
        MemoryStore::new(db)
    }

    fn unit_vec(direction: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[direction % EMBEDDING_DIM] = 1.0;
        v
    }

    fn new_record(user_id: &str, text: &str, embedding: Option<Vec<f32>>) -> NewMemoryRecord {
        NewMemoryRecord {
            id: memory_id(),
            user_id: user_id.to_string(),
            record_type: RecordType::UserMemory,
            source_text: text.to_string(),
            metadata: serde_json::json!({}),
            screenshot: None,
            extracted_text: None,
            embedding,
            created_at: None,
        }
    }

    #[test]
    fn insert_and_get_round_trip() {
        let store = store();
        let record = store
            .insert(new_record("u1", "meeting notes", Some(unit_vec(0))))
            .expect("insert should succeed");

        let fetched = store
            .get(&record.id, "u1")
            .expect("get should succeed")
            .expect("record should exist");
        assert_eq!(fetched.source_text, "meeting notes");
        assert_eq!(fetched.embedding.as_ref().map(Vec::len), Some(EMBEDDING_DIM));

        // Wrong user scope sees nothing.
        assert!(store.get(&record.id, "u2").expect("get").is_none());
    }

    #[test]
    fn insert_rejects_wrong_dimension() {
        let store = store();
        let result = store.insert(new_record("u1", "bad", Some(vec![1.0, 2.0])));
        assert!(result.is_err());
    }

    #[test]
    fn delete_is_idempotent_and_cascades_entities() {
        let store = store();
        let record = store
            .insert(new_record("u1", "with entities", Some(unit_vec(1))))
            .expect("insert");
        store
            .insert_entities(
                &record.id,
                &[NewEntity {
                    entity_kind: "person".to_string(),
                    value: "Dr. Smith".to_string(),
                    entity_type: None,
                }],
            )
            .expect("entities");

        assert!(store.delete(&record.id, "u1").expect("first delete"));
        assert!(!store.delete(&record.id, "u1").expect("second delete"));
        assert!(store.get(&record.id, "u1").expect("get").is_none());
        assert!(store.list_entities(&record.id).expect("entities").is_empty());
    }

    #[test]
    fn entities_are_normalised_on_insert() {
        let store = store();
        let record = store
            .insert(new_record("u1", "entity text", None))
            .expect("insert");
        let inserted = store
            .insert_entities(
                &record.id,
                &[NewEntity {
                    entity_kind: "person".to_string(),
                    value: "Dr. Smith".to_string(),
                    entity_type: None,
                }],
            )
            .expect("insert entities");
        assert_eq!(inserted, 1);

        let entities = store.list_entities(&record.id).expect("list entities");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity, "Dr. Smith");
        assert_eq!(entities[0].normalized_value, "dr. smith");
        assert_eq!(entities[0].entity_type, "person");
    }

    #[test]
    fn vector_search_orders_by_similarity_and_scopes_by_user() {
        let store = store();
        let near = store
            .insert(new_record("u1", "near", Some(unit_vec(0))))
            .expect("insert near");
        let _far = store
            .insert(new_record("u1", "far", Some(unit_vec(1))))
            .expect("insert far");
        let _other_user = store
            .insert(new_record("u2", "someone else", Some(unit_vec(0))))
            .expect("insert other");

        let mut query = unit_vec(0);
        query[1] = 0.05;

        let hits = store
            .vector_search("u1", &query, 10, &VectorFilters::default())
            .expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, near.id);
        assert!(hits[0].similarity > hits[1].similarity);
        assert!(hits.iter().all(|h| h.record.user_id == "u1"));
    }

    #[test]
    fn vector_search_excludes_rows_without_embedding() {
        let store = store();
        store
            .insert(new_record("u1", "no vector", None))
            .expect("insert");
        let hits = store
            .vector_search("u1", &unit_vec(0), 5, &VectorFilters::default())
            .expect("search");
        assert!(hits.is_empty());
    }

    #[test]
    fn vector_search_honours_type_and_age_filters() {
        let store = store();
        let mut capture = new_record("u1", "screen text", Some(unit_vec(0)));
        capture.record_type = RecordType::ScreenCapture;
        store.insert(capture).expect("insert capture");
        store
            .insert(new_record("u1", "typed note", Some(unit_vec(0))))
            .expect("insert note");

        let filters = VectorFilters {
            record_type: Some(RecordType::ScreenCapture),
            ..Default::default()
        };
        let hits = store
            .vector_search("u1", &unit_vec(0), 10, &filters)
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.record_type, RecordType::ScreenCapture);

        let future_only = VectorFilters {
            created_after: Some(Utc::now() + chrono::Duration::days(1)),
            ..Default::default()
        };
        let hits = store
            .vector_search("u1", &unit_vec(0), 10, &future_only)
            .expect("search");
        assert!(hits.is_empty());
    }

    #[test]
    fn vector_search_matches_session_id_in_metadata() {
        let store = store();
        let mut tagged = new_record("u1", "tagged", Some(unit_vec(0)));
        tagged.metadata = serde_json::json!({"sessionId": "sess-42"});
        store.insert(tagged).expect("insert tagged");
        store
            .insert(new_record("u1", "untagged", Some(unit_vec(0))))
            .expect("insert untagged");

        let filters = VectorFilters {
            session_id: Some("sess-42".to_string()),
            ..Default::default()
        };
        let hits = store
            .vector_search("u1", &unit_vec(0), 10, &filters)
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.source_text, "tagged");
    }

    #[test]
    fn replace_preserves_created_at_and_entities() {
        let store = store();
        let original = store
            .insert(new_record("u1", "first draft", Some(unit_vec(0))))
            .expect("insert");
        store
            .insert_entities(
                &original.id,
                &[NewEntity {
                    entity_kind: "topic".to_string(),
                    value: "drafting".to_string(),
                    entity_type: None,
                }],
            )
            .expect("entities");

        let replacement = NewMemoryRecord {
            id: original.id.clone(),
            user_id: original.user_id.clone(),
            record_type: original.record_type.clone(),
            source_text: "second draft".to_string(),
            metadata: original.metadata.clone(),
            screenshot: None,
            extracted_text: None,
            embedding: Some(unit_vec(2)),
            created_at: Some(original.created_at),
        };
        let updated = store.replace(replacement, None).expect("replace");

        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at >= original.updated_at);

        let fetched = store
            .get(&original.id, "u1")
            .expect("get")
            .expect("still exists");
        assert_eq!(fetched.source_text, "second draft");

        let entities = store.list_entities(&original.id).expect("entities");
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].entity, "drafting");
    }

    #[test]
    fn metadata_query_pages_and_counts() {
        let store = store();
        for i in 0..5 {
            store
                .insert(new_record("u1", &format!("note {i}"), None))
                .expect("insert");
        }

        let page = store
            .metadata_query(
                "u1",
                &ListQuery {
                    limit: 2,
                    offset: 0,
                    ..Default::default()
                },
            )
            .expect("list");
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);

        let rest = store
            .metadata_query(
                "u1",
                &ListQuery {
                    limit: 10,
                    offset: 4,
                    ..Default::default()
                },
            )
            .expect("list");
        assert_eq!(rest.records.len(), 1);
    }

    #[test]
    fn purge_removes_old_records_and_their_entities() {
        let store = store();
        let mut old = new_record("u1", "ancient", Some(unit_vec(0)));
        old.created_at = Some(Utc::now() - chrono::Duration::days(400));
        let old = store.insert(old).expect("insert old");
        store
            .insert_entities(
                &old.id,
                &[NewEntity {
                    entity_kind: "topic".to_string(),
                    value: "history".to_string(),
                    entity_type: None,
                }],
            )
            .expect("entities");
        store
            .insert(new_record("u1", "recent", Some(unit_vec(1))))
            .expect("insert recent");

        let removed = store
            .purge_created_before(Utc::now() - chrono::Duration::days(30))
            .expect("purge");
        assert_eq!(removed, 1);
        assert!(store.get(&old.id, "u1").expect("get").is_none());
        assert!(store.list_entities(&old.id).expect("entities").is_empty());

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.total_entities, 0);
    }

    #[test]
    fn rebuild_index_reports_embedded_row_count() {
        let store = store();
        store
            .insert(new_record("u1", "a", Some(unit_vec(0))))
            .expect("insert");
        store.insert(new_record("u1", "b", None)).expect("insert");

        assert_eq!(store.rebuild_index().expect("rebuild"), 1);
        store.compact_index().expect("compact");
        assert_eq!(store.rebuild_index().expect("rebuild"), 1);
    }

    #[test]
    fn stats_track_types_and_age_range() {
        let store = store();
        assert!(store.created_at_range().expect("range").is_none());

        store
            .insert(new_record("u1", "memory", Some(unit_vec(0))))
            .expect("insert");
        let mut capture = new_record("u1", "capture", None);
        capture.record_type = RecordType::ScreenCapture;
        store.insert(capture).expect("insert");

        let stats = store.stats().expect("stats");
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.user_memories, 1);
        assert_eq!(stats.screen_captures, 1);
        assert_eq!(stats.embedded_records, 1);
        assert!(store.created_at_range().expect("range").is_some());
    }
}
