//! Repository factory for creating repository instances
//!
//! This factory provides a centralized way to create the store, blob store,
//! and file resolver with the appropriate backend based on configuration.

use super::memory::MemoryStore;
use super::sqlite::SqliteStore;
use super::traits::{SchemaAdmin, SessionStore, UploadLog};
use crate::config::EngineConfig;
use crate::error::CrmResult;
use crate::files::{BlobStore, FileReferenceResolver, FsBlobStore, MemoryBlobStore};
use crate::model::EnquiryId;
use crate::session::PipelineSession;
use std::sync::Arc;

/// Everything a host needs to open sessions and administer schema
#[derive(Clone)]
pub struct Backend {
    pub config: EngineConfig,
    pub store: Arc<dyn SessionStore>,
    pub admin: Arc<dyn SchemaAdmin>,
    pub blobs: Arc<dyn BlobStore>,
    pub files: FileReferenceResolver,
}

impl Backend {
    /// Open a pipeline session for an enquiry using this backend
    pub async fn open_session(&self, enquiry_id: EnquiryId) -> CrmResult<PipelineSession> {
        PipelineSession::open(
            Arc::clone(&self.store),
            self.files.clone(),
            self.config.session.clone(),
            enquiry_id,
        )
        .await
    }
}

/// Repository factory for creating backend instances
///
/// Encapsulates the choice between SQLite and memory storage, and between a
/// directory and memory for blobs.
pub struct RepositoryFactory;

impl RepositoryFactory {
    /// Build a backend from configuration
    pub fn create(config: &EngineConfig) -> CrmResult<Backend> {
        config.validate()?;

        let blobs: Arc<dyn BlobStore> = match &config.blob_root {
            Some(root) => Arc::new(FsBlobStore::new(root.clone())),
            None => Arc::new(MemoryBlobStore::new()),
        };

        match &config.database_path {
            Some(path) => {
                let store = Arc::new(SqliteStore::open(path)?);
                Ok(Self::assemble(config, store, blobs))
            }
            None => {
                tracing::info!("no database path configured, using in-memory SQLite");
                let store = Arc::new(SqliteStore::in_memory()?);
                Ok(Self::assemble(config, store, blobs))
            }
        }
    }

    /// Build a fully in-process backend for tests and demos
    pub fn create_memory(config: &EngineConfig) -> Backend {
        let store = Arc::new(MemoryStore::new());
        Self::assemble(config, store, Arc::new(MemoryBlobStore::new()))
    }

    fn assemble<S>(config: &EngineConfig, store: Arc<S>, blobs: Arc<dyn BlobStore>) -> Backend
    where
        S: SessionStore + SchemaAdmin + UploadLog + 'static,
    {
        let log: Arc<dyn UploadLog> = store.clone();
        Backend {
            config: config.clone(),
            store: store.clone(),
            admin: store,
            files: FileReferenceResolver::new(Arc::clone(&blobs), log),
            blobs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfigBuilder;
    use crate::error::CrmError;
    use crate::repository::SchemaRepository;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_on_disk_backend() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfigBuilder::new()
            .database_path(dir.path().join("db").join("crm.db"))
            .blob_root(dir.path().join("uploads"))
            .build()
            .unwrap();

        let backend = RepositoryFactory::create(&config).unwrap();
        let pipeline = backend.admin.create_pipeline("Sales").await.unwrap();
        assert_eq!(backend.store.list_pipelines().await.unwrap(), vec![pipeline]);
        assert!(dir.path().join("db").join("crm.db").exists());

        let upload = backend.files.upload("a.txt", b"hi", None).await.unwrap();
        assert!(dir.path().join("uploads").join(&upload.file_path).exists());
    }

    #[tokio::test]
    async fn test_unknown_enquiry_cannot_be_opened() {
        let backend = RepositoryFactory::create_memory(&EngineConfig::default());
        assert!(matches!(
            backend.open_session(EnquiryId(1)).await,
            Err(CrmError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_default_config_uses_in_memory_sqlite() {
        let backend = RepositoryFactory::create(&EngineConfig::default()).unwrap();
        let pipeline = backend.admin.create_pipeline("Support").await.unwrap();
        backend.admin.create_stage(pipeline.id, "Triage").await.unwrap();
        assert_eq!(backend.store.list_stages(pipeline.id).await.unwrap().len(), 1);
    }
}
