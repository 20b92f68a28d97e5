//! Engine configuration

mod builder;

pub use builder::EngineConfigBuilder;

use crate::error::{CrmError, CrmResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the pipeline engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// SQLite database file. `None` keeps everything in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Directory holding uploaded blobs. `None` keeps blobs in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_root: Option<PathBuf>,

    pub session: SessionConfig,
}

/// Behavior of a single pipeline session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Which stage documents a commit writes
    pub commit_scope: CommitScope,

    /// How concurrent writers to the same stage document are reconciled
    pub concurrency: ConcurrencyMode,

    /// Delete uploaded blobs whose draft was cancelled or replaced
    pub discard_uncommitted_uploads: bool,

    /// Number of notices retained per session
    pub notice_capacity: usize,
}

/// Which stage documents a commit writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitScope {
    /// Only stages edited since the last commit
    Touched,
    /// Every stage document currently loaded
    AllLoaded,
}

/// Concurrency policy for stage document writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConcurrencyMode {
    /// Whole-map replace, the last commit wins
    LastWriterWins,
    /// Reject a commit when a document changed since it was loaded
    Optimistic,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            blob_root: None,
            session: SessionConfig::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            commit_scope: CommitScope::Touched,
            concurrency: ConcurrencyMode::LastWriterWins,
            discard_uncommitted_uploads: true,
            notice_capacity: 100,
        }
    }
}

impl EngineConfig {
    /// Read a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> CrmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CrmError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&text).map_err(|e| {
            CrmError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> CrmResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> CrmResult<()> {
        if self.session.notice_capacity == 0 {
            return Err(CrmError::ConfigError(
                "noticeCapacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
