use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thinkdrop_common::{Error, Result, prefixed_id};

use crate::database::Database;
use crate::memory_store::parse_timestamp;

static SKILL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(\.[a-z][a-z0-9]*)+$").expect("skill name pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillExecType {
    Node,
    Shell,
}

impl SkillExecType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Shell => "shell",
        }
    }

    fn from_db(value: &str) -> Result<Self> {
        match value {
            "node" => Ok(Self::Node),
            "shell" => Ok(Self::Shell),
            other => Err(Error::Database(format!("unknown exec type: {other}"))),
        }
    }
}

/// A caller-registered named capability with a contract document and an
/// executable confined to the per-user sandbox directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledSkill {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub contract_md: Option<String>,
    pub exec_path: String,
    pub exec_type: SkillExecType,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSkill {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub contract_md: Option<String>,
    pub exec_path: String,
    pub exec_type: SkillExecType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub struct SkillRegistry {
    db: Arc<Database>,
    sandbox_dir: PathBuf,
}

impl SkillRegistry {
    pub fn new(db: Arc<Database>, sandbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            sandbox_dir: sandbox_dir.into(),
        }
    }

    /// Default sandbox under the user's home directory.
    pub fn default_sandbox_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".thinkdrop").join("skills"))
            .unwrap_or_else(|| PathBuf::from(".thinkdrop/skills"))
    }

    pub fn register(&self, skill: NewSkill) -> Result<InstalledSkill> {
        if !SKILL_NAME.is_match(&skill.name) {
            return Err(Error::InvalidRequest(format!(
                "invalid skill name: {:?} (expected dotted lowercase identifier)",
                skill.name
            )));
        }
        let exec_path = self.validate_exec_path(&skill.exec_path)?;

        let id = prefixed_id("skill");
        let now = Utc::now();

        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO installed_skills (
                id, name, description, contract_md, exec_path, exec_type,
                enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                description = excluded.description,
                contract_md = excluded.contract_md,
                exec_path = excluded.exec_path,
                exec_type = excluded.exec_type,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![
                id,
                skill.name,
                skill.description,
                skill.contract_md,
                exec_path.to_string_lossy(),
                skill.exec_type.as_str(),
                skill.enabled,
                now.to_rfc3339(),
                now.to_rfc3339()
            ],
        )
        .map_err(|e| Error::Database(format!("failed to register skill: {e}")))?;
        drop(conn);

        self.get(&skill.name)?
            .ok_or_else(|| Error::Database("registered skill vanished".into()))
    }

    /// Reject exec paths that escape the sandbox directory. The check is
    /// lexical: the path must be inside the sandbox and contain no `..`
    /// components, whether or not the file exists yet.
    fn validate_exec_path(&self, raw: &str) -> Result<PathBuf> {
        let path = Path::new(raw);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.sandbox_dir.join(path)
        };

        if absolute
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(Error::InvalidRequest(format!(
                "exec path must not contain '..': {raw:?}"
            )));
        }
        if !absolute.starts_with(&self.sandbox_dir) {
            return Err(Error::InvalidRequest(format!(
                "exec path must live under {}",
                self.sandbox_dir.display()
            )));
        }
        Ok(absolute)
    }

    pub fn get(&self, name: &str) -> Result<Option<InstalledSkill>> {
        let conn = self.db.connection()?;
        conn.query_row(
            "SELECT id, name, description, contract_md, exec_path, exec_type,
                    enabled, created_at, updated_at
             FROM installed_skills WHERE name = ?",
            params![name],
            row_to_skill,
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to fetch skill: {e}")))
    }

    pub fn list(&self) -> Result<Vec<InstalledSkill>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, contract_md, exec_path, exec_type,
                        enabled, created_at, updated_at
                 FROM installed_skills ORDER BY name",
            )
            .map_err(|e| Error::Database(format!("failed to prepare skill list: {e}")))?;

        stmt.query_map([], row_to_skill)
            .map_err(|e| Error::Database(format!("failed to list skills: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to collect skills: {e}")))
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let conn = self.db.connection()?;
        let rows = conn
            .execute(
                "UPDATE installed_skills SET enabled = ?, updated_at = ? WHERE name = ?",
                params![enabled, Utc::now().to_rfc3339(), name],
            )
            .map_err(|e| Error::Database(format!("failed to toggle skill: {e}")))?;
        Ok(rows > 0)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let conn = self.db.connection()?;
        let rows = conn
            .execute("DELETE FROM installed_skills WHERE name = ?", params![name])
            .map_err(|e| Error::Database(format!("failed to remove skill: {e}")))?;
        Ok(rows > 0)
    }
}

fn row_to_skill(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstalledSkill> {
    let exec_type_str: String = row.get(5)?;
    let exec_type = SkillExecType::from_db(&exec_type_str).map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(e.to_string())))
    })?;

    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(InstalledSkill {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        contract_md: row.get(3)?,
        exec_path: row.get(4)?,
        exec_type,
        enabled: row.get(6)?,
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

    fn registry() -> SkillRegistry {
        let db = Arc::new(Database::in_memory().expect("in-memory database"));
        SkillRegistry::new(db, "/home/tester/.thinkdrop/skills")
    }

    fn skill(name: &str, exec_path: &str) -> NewSkill {
        NewSkill {
            name: name.to_string(),
            description: Some("test skill".to_string()),
            contract_md: None,
            exec_path: exec_path.to_string(),
            exec_type: SkillExecType::Node,
            enabled: true,
        }
    }

    #[test]
    fn register_and_get_round_trip() {
        let registry = registry();
        let installed = registry
            .register(skill("mail.compose", "mail/run.js"))
            .expect("register");
        assert_eq!(installed.name, "mail.compose");
        assert!(installed.exec_path.ends_with("mail/run.js"));
        assert!(installed.enabled);

        let fetched = registry.get("mail.compose").expect("get").expect("exists");
        assert_eq!(fetched.id, installed.id);
    }

    #[test]
    fn name_pattern_is_enforced() {
        let registry = registry();
        for bad in ["Mail.compose", "mail", "mail..compose", "1mail.compose", "mail.Compose"] {
            assert!(
                registry.register(skill(bad, "run.js")).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(registry.register(skill("mail.compose.v2", "run.js")).is_ok());
    }

    #[test]
    fn exec_path_must_stay_in_sandbox() {
        let registry = registry();
        assert!(registry.register(skill("esc.try", "../../etc/passwd")).is_err());
        assert!(registry.register(skill("esc.abs", "/usr/bin/python")).is_err());
        assert!(
            registry
                .register(skill("ok.rel", "tools/run.sh"))
                .is_ok()
        );
        assert!(
            registry
                .register(skill(
                    "ok.abs",
                    "/home/tester/.thinkdrop/skills/abs/run.sh"
                ))
                .is_ok()
        );
    }

    #[test]
    fn reregistering_same_name_updates_in_place() {
        let registry = registry();
        registry.register(skill("mail.compose", "v1.js")).expect("register");
        let updated = registry
            .register(skill("mail.compose", "v2.js"))
            .expect("re-register");
        assert!(updated.exec_path.ends_with("v2.js"));
        assert_eq!(registry.list().expect("list").len(), 1);
    }

    #[test]
    fn enable_disable_and_remove() {
        let registry = registry();
        registry.register(skill("mail.compose", "run.js")).expect("register");

        assert!(registry.set_enabled("mail.compose", false).expect("disable"));
        let fetched = registry.get("mail.compose").expect("get").expect("exists");
        assert!(!fetched.enabled);

        assert!(registry.remove("mail.compose").expect("remove"));
        assert!(!registry.remove("mail.compose").expect("second remove"));
        assert!(registry.get("mail.compose").expect("get").is_none());
    }
}
