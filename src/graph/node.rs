use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pointer to a span of a file as it existed at a specific commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceNode {
    pub id: String,
    pub file_path: String,
    /// Free-form line description such as `1-3,7,13-70`. Never parsed here.
    pub line_ref: String,
    pub git_commit: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimNode {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// `evidence_id` supports `claim_id`. Duplicates are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub claim_id: String,
    pub evidence_id: String,
}

pub(crate) fn new_node_id() -> String {
    Uuid::new_v4().simple().to_string()
}
