use thiserror::Error;

/// Central error type for the enquiry pipeline engine
#[derive(Error, Debug)]
pub enum CrmError {
    // ============================================================================
    // Schema Errors
    // ============================================================================
    #[error("Failed to fetch pipeline schema: {0}")]
    SchemaFetch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ============================================================================
    // Document Errors
    // ============================================================================
    #[error("Failed to load stage documents: {0}")]
    DocumentLoad(String),

    #[error("Failed to save data: {0}")]
    Commit(String),

    #[error("Stage document {stage_id} changed concurrently: expected version {expected}, found {actual}")]
    VersionConflict {
        stage_id: i64,
        expected: i64,
        actual: i64,
    },

    #[error("Field {field_id} expects a {expected} value")]
    FieldTypeMismatch { field_id: i64, expected: String },

    // ============================================================================
    // File Errors
    // ============================================================================
    #[error("File transfer failed: {0}")]
    FileTransfer(String),

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    // ============================================================================
    // Session Errors
    // ============================================================================
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Another operation is already in flight")]
    Busy,

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Builder pattern validation error
    #[error("Builder error: {0}")]
    BuilderError(String),
}

/// Failure category reported to the caller alongside a notice
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    SchemaFetch,
    DocumentLoad,
    Commit,
    FileTransfer,
    Session,
    Other,
}

impl CrmError {
    /// Classify this error into one of the notice categories
    pub fn kind(&self) -> ErrorKind {
        match self {
            CrmError::SchemaFetch(_) => ErrorKind::SchemaFetch,
            CrmError::DocumentLoad(_) => ErrorKind::DocumentLoad,
            CrmError::Commit(_) | CrmError::VersionConflict { .. } => ErrorKind::Commit,
            CrmError::FileTransfer(_) | CrmError::InvalidPath(_) => ErrorKind::FileTransfer,
            CrmError::InvalidStateTransition(_)
            | CrmError::Busy
            | CrmError::FieldTypeMismatch { .. } => ErrorKind::Session,
            _ => ErrorKind::Other,
        }
    }

    /// Re-wrap a lower-level failure as a schema fetch failure
    pub fn into_schema_fetch(self) -> Self {
        match self {
            CrmError::SchemaFetch(_) => self,
            other => CrmError::SchemaFetch(other.to_string()),
        }
    }

    /// Re-wrap a lower-level failure as a document load failure
    pub fn into_document_load(self) -> Self {
        match self {
            CrmError::DocumentLoad(_) => self,
            other => CrmError::DocumentLoad(other.to_string()),
        }
    }

    /// Re-wrap a lower-level failure as a commit failure.
    ///
    /// Version conflicts keep their shape so callers can offer a reload.
    pub fn into_commit(self) -> Self {
        match self {
            CrmError::Commit(_) | CrmError::VersionConflict { .. } => self,
            other => CrmError::Commit(other.to_string()),
        }
    }

    /// Re-wrap a lower-level failure as a file transfer failure
    pub fn into_file_transfer(self) -> Self {
        match self {
            CrmError::FileTransfer(_) | CrmError::InvalidPath(_) => self,
            other => CrmError::FileTransfer(other.to_string()),
        }
    }
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for CrmError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        CrmError::LockError
    }
}

// Implement conversion to String for UI bindings
impl From<CrmError> for String {
    fn from(error: CrmError) -> Self {
        error.to_string()
    }
}

// Helper type alias for Results
pub type CrmResult<T> = Result<T, CrmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CrmError::Busy;
        assert_eq!(err.to_string(), "Another operation is already in flight");
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = CrmError::NotFound("stage 999".to_string());
        let s: String = err.into();
        assert_eq!(s, "Not found: stage 999");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: CrmError = io_err.into();
        assert!(matches!(err, CrmError::Io(_)));
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_commit_wrapping_keeps_cause() {
        let err = CrmError::Sqlite(rusqlite::Error::QueryReturnedNoRows).into_commit();
        assert_eq!(err.kind(), ErrorKind::Commit);
        assert!(err.to_string().contains("Query returned no rows"));
    }

    #[test]
    fn test_version_conflict_is_commit_kind() {
        let err = CrmError::VersionConflict {
            stage_id: 2,
            expected: 1,
            actual: 3,
        }
        .into_commit();
        assert!(matches!(err, CrmError::VersionConflict { .. }));
        assert!(err.to_string().contains("expected version 1"));
    }
}
