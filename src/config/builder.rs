use super::{CommitScope, ConcurrencyMode, EngineConfig, SessionConfig};
use crate::error::{CrmError, CrmResult};
use std::path::PathBuf;

/// Builder for constructing EngineConfig instances with a fluent API
///
/// # Example
/// ```
/// use enquiry_pipeline::config::{CommitScope, EngineConfigBuilder};
///
/// let config = EngineConfigBuilder::new()
///     .database_path("data/crm.db")
///     .blob_root("data/uploads")
///     .commit_scope(CommitScope::AllLoaded)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    database_path: Option<PathBuf>,
    blob_root: Option<PathBuf>,
    session: SessionConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist to a SQLite file instead of memory
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Store blobs under a directory instead of memory
    pub fn blob_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.blob_root = Some(path.into());
        self
    }

    pub fn commit_scope(mut self, scope: CommitScope) -> Self {
        self.session.commit_scope = scope;
        self
    }

    pub fn concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.session.concurrency = mode;
        self
    }

    pub fn discard_uncommitted_uploads(mut self, discard: bool) -> Self {
        self.session.discard_uncommitted_uploads = discard;
        self
    }

    pub fn notice_capacity(mut self, capacity: usize) -> Self {
        self.session.notice_capacity = capacity;
        self
    }

    /// Build the EngineConfig instance
    ///
    /// # Errors
    /// Returns `CrmError::BuilderError` if a value is out of range or a path
    /// is empty
    pub fn build(self) -> CrmResult<EngineConfig> {
        if self.session.notice_capacity == 0 {
            return Err(CrmError::BuilderError(
                "notice capacity must be at least 1".to_string(),
            ));
        }
        for (name, path) in [
            ("database path", &self.database_path),
            ("blob root", &self.blob_root),
        ] {
            if matches!(path, Some(p) if p.as_os_str().is_empty()) {
                return Err(CrmError::BuilderError(format!("{} is empty", name)));
            }
        }

        Ok(EngineConfig {
            database_path: self.database_path,
            blob_root: self.blob_root,
            session: self.session,
        })
    }
}
