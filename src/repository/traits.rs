//! Repository trait definitions
//!
//! These traits define the abstract interfaces for data access operations.
//! Different implementations can provide different storage backends.

use crate::error::CrmResult;
use crate::model::{
    CommitBatch, DocumentKey, EnquiryId, EnquiryPointer, Field, FieldId, FieldType, Pipeline,
    PipelineId, Stage, StageDocument, StageDocuments, StageId, UploadedFile, ValueMap,
};
use async_trait::async_trait;

/// Read access to pipeline, stage, and field definitions
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    /// List every pipeline
    async fn list_pipelines(&self) -> CrmResult<Vec<Pipeline>>;

    /// List a pipeline's stages in rank order
    async fn list_stages(&self, pipeline_id: PipelineId) -> CrmResult<Vec<Stage>>;

    /// List a stage's fields in rank order
    async fn list_fields(&self, stage_id: StageId) -> CrmResult<Vec<Field>>;
}

/// Administrator mutations of the schema
///
/// Deletes cascade: a pipeline takes its stages with it, a stage takes its
/// fields and every stage document written against it.
#[async_trait]
pub trait SchemaAdmin: SchemaRepository {
    async fn create_pipeline(&self, name: &str) -> CrmResult<Pipeline>;

    async fn rename_pipeline(&self, id: PipelineId, name: &str) -> CrmResult<Pipeline>;

    async fn delete_pipeline(&self, id: PipelineId) -> CrmResult<()>;

    /// Append a stage after the pipeline's last stage
    async fn create_stage(&self, pipeline_id: PipelineId, name: &str) -> CrmResult<Stage>;

    async fn rename_stage(&self, id: StageId, name: &str) -> CrmResult<Stage>;

    async fn delete_stage(&self, id: StageId) -> CrmResult<()>;

    /// Rewrite stage ranks; `order` must list every stage of the pipeline once
    async fn reorder_stages(&self, pipeline_id: PipelineId, order: &[StageId])
        -> CrmResult<Vec<Stage>>;

    /// Append a field after the stage's last field
    async fn create_field(
        &self,
        stage_id: StageId,
        name: &str,
        field_type: FieldType,
    ) -> CrmResult<Field>;

    async fn update_field(&self, id: FieldId, name: &str, field_type: FieldType)
        -> CrmResult<Field>;

    async fn delete_field(&self, id: FieldId) -> CrmResult<()>;
}

/// Storage for per-stage value documents
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Load every stage document of an enquiry under a pipeline
    async fn load(&self, enquiry_id: EnquiryId, pipeline_id: PipelineId)
        -> CrmResult<StageDocuments>;

    /// Write a batch of whole-map replacements as one transaction.
    ///
    /// Either every entry is stored or none is.
    async fn upsert_batch(&self, batch: &CommitBatch) -> CrmResult<Vec<StageDocument>>;

    /// Insert or replace the value map stored under `key`
    async fn upsert(&self, key: DocumentKey, values: &ValueMap) -> CrmResult<StageDocument> {
        let mut batch = CommitBatch::new(key.enquiry_id, key.pipeline_id);
        batch.push(key.stage_id, values.clone(), None);
        let mut stored = self.upsert_batch(&batch).await?;
        stored.pop().ok_or_else(|| {
            crate::error::CrmError::Commit(format!("no document stored for stage {}", key.stage_id))
        })
    }

    /// Load the document stored under one key
    async fn load_stage(&self, key: DocumentKey) -> CrmResult<Option<StageDocument>> {
        let mut documents = self.load(key.enquiry_id, key.pipeline_id).await?;
        Ok(documents.remove(&key.stage_id))
    }
}

/// Read/write access to the pipeline columns of an enquiry record
#[async_trait]
pub trait EnquiryRepository: Send + Sync {
    /// Fails with `NotFound` when the enquiry does not exist
    async fn get_pointer(&self, enquiry_id: EnquiryId) -> CrmResult<EnquiryPointer>;

    /// Fails with `NotFound` when the enquiry does not exist
    async fn set_pointer(&self, pointer: &EnquiryPointer) -> CrmResult<()>;
}

/// Log of blobs uploaded through the engine
#[async_trait]
pub trait UploadLog: Send + Sync {
    async fn record_upload(&self, file: &UploadedFile) -> CrmResult<()>;

    async fn find_upload(&self, file_path: &str) -> CrmResult<Option<UploadedFile>>;

    async fn forget_upload(&self, file_path: &str) -> CrmResult<()>;
}

/// Everything a pipeline session needs from the relational store
#[async_trait]
pub trait SessionStore: SchemaRepository + DocumentRepository + EnquiryRepository {
    /// Persist a commit: the document batch and the enquiry pointer.
    ///
    /// Both halves must land together or not at all. A failure in either
    /// leaves every document and the pointer as they were, so implementations
    /// cannot simply call `upsert_batch` followed by `set_pointer`.
    async fn commit_session(
        &self,
        batch: &CommitBatch,
        pointer: &EnquiryPointer,
    ) -> CrmResult<Vec<StageDocument>>;
}
