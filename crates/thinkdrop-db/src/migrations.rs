/// Schema migrations applied idempotently on startup.
///
/// Each migration has a version number and a SQL batch; all statements use
/// `IF NOT EXISTS` so re-running them against an existing file is safe.
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MEMORY_SCHEMA_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS memory (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL DEFAULT 'default_user',
    type TEXT NOT NULL DEFAULT 'user_memory',
    source_text TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    screenshot TEXT,
    extracted_text TEXT,
    embedding BLOB,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_user ON memory(user_id);
CREATE INDEX IF NOT EXISTS idx_memory_type ON memory(type);
CREATE INDEX IF NOT EXISTS idx_memory_created ON memory(created_at);
CREATE INDEX IF NOT EXISTS idx_memory_user_created ON memory(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memory_user_type ON memory(user_id, type);
CREATE INDEX IF NOT EXISTS idx_memory_user_type_created ON memory(user_id, type, created_at DESC);

CREATE TABLE IF NOT EXISTS memory_entities (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL REFERENCES memory(id) ON DELETE CASCADE,
    entity TEXT NOT NULL,
    type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    normalized_value TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_memory ON memory_entities(memory_id);
CREATE INDEX IF NOT EXISTS idx_entities_entity ON memory_entities(entity);
CREATE INDEX IF NOT EXISTS idx_entities_type ON memory_entities(type);
CREATE INDEX IF NOT EXISTS idx_entities_entity_type ON memory_entities(entity_type);
";

pub const AUX_SCHEMA_V1_SQL: &str = "
CREATE TABLE IF NOT EXISTS skill_prompts (
    id TEXT PRIMARY KEY,
    tags TEXT NOT NULL DEFAULT '',
    prompt_text TEXT NOT NULL,
    embedding BLOB,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS context_rules (
    id TEXT PRIMARY KEY,
    context_type TEXT NOT NULL CHECK (context_type IN ('site', 'app')),
    context_key TEXT NOT NULL,
    rule_text TEXT NOT NULL,
    category TEXT,
    source TEXT,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (context_type, context_key, rule_text)
);

CREATE INDEX IF NOT EXISTS idx_context_rules_key ON context_rules(context_type, context_key);

CREATE TABLE IF NOT EXISTS installed_skills (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    contract_md TEXT,
    exec_path TEXT NOT NULL,
    exec_type TEXT NOT NULL CHECK (exec_type IN ('node', 'shell')),
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

pub const MEMORY_SCHEMA_V1: Migration = Migration {
    version: 1,
    name: "memory_schema_v1",
    sql: MEMORY_SCHEMA_V1_SQL,
};

pub const AUX_SCHEMA_V1: Migration = Migration {
    version: 2,
    name: "aux_schema_v1",
    sql: AUX_SCHEMA_V1_SQL,
};

pub const ALL: &[&Migration] = &[&MEMORY_SCHEMA_V1, &AUX_SCHEMA_V1];
