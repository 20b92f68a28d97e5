use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata row written for every blob uploaded through a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Original name as selected by the user
    pub file_name: String,
    /// Unique blob store path; never reused
    pub file_path: String,
    pub file_size: u64,
    pub content_type: String,
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}
