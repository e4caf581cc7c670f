use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- Row service --

/// Result of a batch upsert against the row service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Rows the store already held at an equal or newer `updated_at`.
    pub ignored: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

// -- Search --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub owner_id: Uuid,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: Uuid,
    pub content: String,
    /// Cosine similarity in `0..=1`.
    pub similarity: f32,
    #[serde(default)]
    pub chain_id: Option<Uuid>,
    #[serde(default)]
    pub anchored_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
