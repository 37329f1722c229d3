use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use thinkdrop_common::{Error, Result, prefixed_id};

use crate::database::Database;
use crate::memory_store::parse_timestamp;

/// Where a context rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextType {
    Site,
    App,
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Site => "site",
            Self::App => "app",
        }
    }

    fn from_db(value: &str) -> Result<Self> {
        match value {
            "site" => Ok(Self::Site),
            "app" => Ok(Self::App),
            other => Err(Error::Database(format!("unknown context type: {other}"))),
        }
    }
}

/// A per-site or per-app text snippet injected into downstream prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRule {
    pub id: String,
    pub context_type: ContextType,
    /// Hostname or application name, lowercased.
    pub context_key: String,
    pub rule_text: String,
    pub category: Option<String>,
    pub source: Option<String>,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewContextRule {
    pub context_type: ContextType,
    pub context_key: String,
    pub rule_text: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

pub struct ContextRuleStore {
    db: Arc<Database>,
}

impl ContextRuleStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a rule; the (type, key, text) triple is unique after trim, so
    /// re-setting an existing rule refreshes its metadata instead of
    /// duplicating it.
    pub fn set(&self, rule: NewContextRule) -> Result<ContextRule> {
        let context_key = rule.context_key.trim().to_lowercase();
        let rule_text = rule.rule_text.trim().to_string();
        if context_key.is_empty() || rule_text.is_empty() {
            return Err(Error::InvalidRequest(
                "context key and rule text are required".into(),
            ));
        }

        let now = Utc::now().to_rfc3339();
        let id = prefixed_id("rule");

        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO context_rules (
                id, context_type, context_key, rule_text, category, source,
                hit_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT (context_type, context_key, rule_text) DO UPDATE SET
                category = excluded.category,
                source = excluded.source,
                updated_at = excluded.updated_at",
            params![
                id,
                rule.context_type.as_str(),
                context_key,
                rule_text,
                rule.category,
                rule.source,
                now,
                now
            ],
        )
        .map_err(|e| Error::Database(format!("failed to set context rule: {e}")))?;

        let stored = conn
            .query_row(
                "SELECT id, context_type, context_key, rule_text, category, source,
                        hit_count, created_at, updated_at
                 FROM context_rules
                 WHERE context_type = ? AND context_key = ? AND rule_text = ?",
                params![rule.context_type.as_str(), context_key, rule_text],
                row_to_rule,
            )
            .map_err(|e| Error::Database(format!("failed to read back context rule: {e}")))?;
        Ok(stored)
    }

    /// Exact-match lookup by (type, lowercased key). Bumps each returned
    /// rule's hit count.
    pub fn lookup(&self, context_type: ContextType, context_key: &str) -> Result<Vec<ContextRule>> {
        let key = context_key.trim().to_lowercase();
        let conn = self.db.connection()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, context_type, context_key, rule_text, category, source,
                        hit_count, created_at, updated_at
                 FROM context_rules
                 WHERE context_type = ? AND context_key = ?
                 ORDER BY datetime(created_at)",
            )
            .map_err(|e| Error::Database(format!("failed to prepare rule lookup: {e}")))?;

        let rules: Vec<ContextRule> = stmt
            .query_map(params![context_type.as_str(), key], row_to_rule)
            .map_err(|e| Error::Database(format!("failed to query rules: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect rules: {e}")))?;

        let now = Utc::now().to_rfc3339();
        for rule in &rules {
            conn.execute(
                "UPDATE context_rules SET hit_count = hit_count + 1, updated_at = ? WHERE id = ?",
                params![now, rule.id],
            )
            .map_err(|e| Error::Database(format!("failed to bump rule hit count: {e}")))?;
        }

        Ok(rules)
    }

    pub fn list(&self) -> Result<Vec<ContextRule>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, context_type, context_key, rule_text, category, source,
                        hit_count, created_at, updated_at
                 FROM context_rules ORDER BY context_type, context_key",
            )
            .map_err(|e| Error::Database(format!("failed to prepare rule list: {e}")))?;

        stmt.query_map([], row_to_rule)
            .map_err(|e| Error::Database(format!("failed to list rules: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect rules: {e}")))
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        let rows = conn
            .execute("DELETE FROM context_rules WHERE id = ?", params![id])
            .map_err(|e| Error::Database(format!("failed to delete rule: {e}")))?;
        Ok(rows > 0)
    }
}

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRule> {
    let type_str: String = row.get(1)?;
    let context_type = ContextType::from_db(&type_str).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
    })?;

    let hit_count: i64 = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(ContextRule {
        id: row.get(0)?,
        context_type,
        context_key: row.get(2)?,
        rule_text: row.get(3)?,
        category: row.get(4)?,
        source: row.get(5)?,
        hit_count: hit_count.max(0) as u64,
        created_at: parse_timestamp(&created_at).map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
        })?,
        updated_at: parse_timestamp(&updated_at).map_err(|e| {
            rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
        })?,
    })
}
