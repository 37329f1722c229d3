use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for stored records. Callers may define their own types;
/// anything unknown is carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    UserMemory,
    ScreenCapture,
    Other(String),
}

impl RecordType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserMemory => "user_memory",
            Self::ScreenCapture => "screen_capture",
            Self::Other(s) => s,
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "user_memory" => Self::UserMemory,
            "screen_capture" => Self::ScreenCapture,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for RecordType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecordType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_str(&raw))
    }
}

/// A persisted memory record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub source_text: String,
    /// Opaque caller metadata, stored string-serialised.
    pub metadata: serde_json::Value,
    pub screenshot: Option<String>,
    pub extracted_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape before persistence assigns timestamps.
#[derive(Debug, Clone)]
pub struct NewMemoryRecord {
    pub id: String,
    pub user_id: String,
    pub record_type: RecordType,
    pub source_text: String,
    pub metadata: serde_json::Value,
    pub screenshot: Option<String>,
    pub extracted_text: Option<String>,
    pub embedding: Option<Vec<f32>>,
    /// Preserved on update-reinsert; `None` means "now".
    pub created_at: Option<DateTime<Utc>>,
}

/// An entity row attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub memory_id: String,
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_kind: String,
    pub entity_type: String,
    pub normalized_value: String,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied entity before normalisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    #[serde(rename = "type")]
    pub entity_kind: String,
    pub value: String,
    #[serde(default, rename = "entityType")]
    pub entity_type: Option<String>,
}

/// Filters applied to a vector search.
#[derive(Debug, Clone, Default)]
pub struct VectorFilters {
    pub record_type: Option<RecordType>,
    /// Substring match against the stored metadata JSON.
    pub session_id: Option<String>,
    /// Exclude records created before this instant.
    pub created_after: Option<DateTime<Utc>>,
}

/// One vector search result with its exact cosine similarity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: MemoryRecord,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortKey {
    #[serde(rename = "createdAt")]
    CreatedAt,
    #[serde(rename = "updatedAt")]
    UpdatedAt,
}

impl SortKey {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Desc,
    Asc,
}

impl SortOrder {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            Self::Desc => "DESC",
            Self::Asc => "ASC",
        }
    }
}

/// Structured list query over a user's records.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub record_type: Option<RecordType>,
    pub sort: SortKey,
    pub order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            record_type: None,
            sort: SortKey::CreatedAt,
            order: SortOrder::Desc,
            limit: 50,
            offset: 0,
        }
    }
}

/// One page of list results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub records: Vec<MemoryRecord>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregate store statistics for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_records: usize,
    pub user_memories: usize,
    pub screen_captures: usize,
    pub embedded_records: usize,
    pub total_entities: usize,
    pub oldest_created_at: Option<DateTime<Utc>>,
    pub newest_created_at: Option<DateTime<Utc>>,
}
