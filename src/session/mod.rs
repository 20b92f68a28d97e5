//! Pipeline session: the state machine driving one open enquiry
//!
//! A session loads the pipeline catalogue and the enquiry's pointer, renders
//! the active stage from stage documents loaded in one batch, keeps edits in
//! an in-memory draft, and commits drafts and pointer together.
//!
//! Every failure is recorded as a [`Notice`] (and broadcast as a
//! [`SessionEvent`]) before the operation returns it, so a UI can either
//! branch on the result or simply show the notice log.

pub mod draft;
pub mod handle;
pub mod state;
pub mod view;

pub use draft::{Draft, DraftSet};
pub use handle::SessionHandle;
pub use state::SessionState;
pub use view::SessionView;

use crate::config::{CommitScope, ConcurrencyMode, SessionConfig};
use crate::error::{CrmError, CrmResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::files::{FileDownload, FilePreview, FileReferenceResolver};
use crate::model::{
    CommitBatch, EnquiryId, EnquiryPointer, Field, FieldId, FieldType, FieldValue, Pipeline,
    PipelineId, Stage, StageDocument, StageDocuments, StageId, UploadedFile, ValueMap,
};
use crate::notice::{Notice, NoticeLog};
use crate::registry::{render_fields, FieldRegistry};
use crate::repository::SessionStore;
use crate::resolver::{resolve_stage, ActiveStage};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One user's editing session over one enquiry
pub struct PipelineSession {
    enquiry_id: EnquiryId,
    store: Arc<dyn SessionStore>,
    files: FileReferenceResolver,
    config: SessionConfig,
    state: SessionState,
    /// Last pointer read from or written to the store
    pointer: EnquiryPointer,
    pipelines: Vec<Pipeline>,
    pipeline: Option<Pipeline>,
    stages: Vec<Stage>,
    active: Option<ActiveStage>,
    active_fields: Vec<Field>,
    registry: FieldRegistry,
    documents: StageDocuments,
    drafts: DraftSet,
    notices: NoticeLog,
    events: EventEmitter,
    uploaded_by: Option<String>,
}

impl PipelineSession {
    /// Open a session for an enquiry.
    ///
    /// Loads the pipeline catalogue and the enquiry pointer. When the enquiry
    /// already has a pipeline it is loaded with its recorded stage; otherwise
    /// the session starts `Unselected`. Catalogue and document failures are
    /// recorded as notices and do not prevent the session from opening; an
    /// unreadable enquiry pointer does.
    pub async fn open(
        store: Arc<dyn SessionStore>,
        files: FileReferenceResolver,
        config: SessionConfig,
        enquiry_id: EnquiryId,
    ) -> CrmResult<Self> {
        let pointer = store.get_pointer(enquiry_id).await?;
        let mut session = Self {
            enquiry_id,
            store,
            files,
            notices: NoticeLog::new(config.notice_capacity),
            config,
            state: SessionState::Unselected,
            pointer,
            pipelines: Vec::new(),
            pipeline: None,
            stages: Vec::new(),
            active: None,
            active_fields: Vec::new(),
            registry: FieldRegistry::new(),
            documents: StageDocuments::new(),
            drafts: DraftSet::new(),
            events: EventEmitter::default(),
            uploaded_by: None,
        };

        // Failures are already recorded as notices
        let _ = session.refresh_catalog().await;
        if let Some(pipeline_id) = pointer.pipeline_id {
            let _ = session
                .load_pipeline(pipeline_id, pointer.current_stage_id)
                .await;
        }

        tracing::info!(
            enquiry_id = %enquiry_id,
            state = %session.state,
            "opened pipeline session"
        );
        Ok(session)
    }

    /// Attribute uploads made through this session to a user
    pub fn with_uploader(mut self, user: impl Into<String>) -> Self {
        self.uploaded_by = Some(user.into());
        self
    }

    pub fn enquiry_id(&self) -> EnquiryId {
        self.enquiry_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pointer(&self) -> EnquiryPointer {
        self.pointer
    }

    pub fn documents(&self) -> &StageDocuments {
        &self.documents
    }

    pub fn drafts(&self) -> &DraftSet {
        &self.drafts
    }

    /// Recorded notices, oldest first
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.to_vec()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Re-read the pipeline catalogue and drop cached field lists.
    ///
    /// While `Viewing`, the active stage's fields are fetched again so schema
    /// edits show up without reselecting. On failure the previous schema is
    /// kept.
    pub async fn refresh_catalog(&mut self) -> CrmResult<()> {
        let store = Arc::clone(&self.store);
        let listed = store.list_pipelines().await;
        match listed {
            Ok(pipelines) => self.pipelines = pipelines,
            Err(e) => return Err(self.report(e.into_schema_fetch())),
        }
        self.registry.invalidate();

        let Some(stage_id) = self.active_stage_id() else {
            return Ok(());
        };
        if self.state != SessionState::Viewing {
            return Ok(());
        }
        let fetched = self.registry.fields_for(&*store, stage_id).await;
        match fetched {
            Ok(fields) => {
                self.active_fields = fields;
                Ok(())
            }
            Err(e) => Err(self.report(e.into_schema_fetch())),
        }
    }

    /// Choose the pipeline for this enquiry.
    ///
    /// Permitted while `Unselected`, or while `Viewing` to switch pipelines.
    /// Drafts are cleared and the first stage becomes active.
    pub async fn select_pipeline(&mut self, pipeline_id: PipelineId) -> CrmResult<()> {
        if !matches!(self.state, SessionState::Unselected | SessionState::Viewing) {
            let err = CrmError::InvalidStateTransition(format!(
                "Cannot select a pipeline from {} state",
                self.state
            ));
            return Err(self.report(err));
        }
        self.load_pipeline(pipeline_id, None).await
    }

    async fn load_pipeline(
        &mut self,
        pipeline_id: PipelineId,
        recorded_stage: Option<StageId>,
    ) -> CrmResult<()> {
        let previous = self.state;
        self.enter(SessionState::Loading, "load a pipeline")?;
        // Stage fields may have changed since they were cached
        self.registry.invalidate();

        let fetched = self.fetch_pipeline(pipeline_id, recorded_stage).await;
        match fetched {
            Ok((pipeline, stages, active, fields)) => {
                self.discard_drafts().await;
                self.pipeline = Some(pipeline);
                self.stages = stages;
                self.active = active;
                self.active_fields = fields;
                self.documents = self.fetch_documents(pipeline_id).await;
                self.enter(SessionState::Viewing, "finish loading")?;

                self.events
                    .pipeline_selected(self.enquiry_id, pipeline_id, self.stages.len());
                tracing::info!(
                    enquiry_id = %self.enquiry_id,
                    pipeline_id = %pipeline_id,
                    stage = ?self.active.as_ref().map(|a| a.stage.name.as_str()),
                    "loaded pipeline"
                );
                Ok(())
            }
            Err(e) => {
                // Keep whatever schema was shown before
                self.enter(previous, "restore state")?;
                Err(self.report(e))
            }
        }
    }

    /// Schema half of a pipeline load. Leaves the displayed schema alone.
    async fn fetch_pipeline(
        &mut self,
        pipeline_id: PipelineId,
        recorded_stage: Option<StageId>,
    ) -> CrmResult<(Pipeline, Vec<Stage>, Option<ActiveStage>, Vec<Field>)> {
        let store = Arc::clone(&self.store);

        let pipeline = match self.pipelines.iter().find(|p| p.id == pipeline_id) {
            Some(p) => p.clone(),
            None => {
                // The catalogue may predate the pipeline or may have failed to load
                self.pipelines = store
                    .list_pipelines()
                    .await
                    .map_err(CrmError::into_schema_fetch)?;
                self.pipelines
                    .iter()
                    .find(|p| p.id == pipeline_id)
                    .cloned()
                    .ok_or_else(|| CrmError::NotFound(format!("pipeline {}", pipeline_id)))?
            }
        };

        let stages = store
            .list_stages(pipeline_id)
            .await
            .map_err(CrmError::into_schema_fetch)?;
        let active = resolve_stage(&stages, recorded_stage);
        let fields = match &active {
            Some(a) => self
                .registry
                .fields_for(&*store, a.stage.id)
                .await
                .map_err(CrmError::into_schema_fetch)?,
            None => Vec::new(),
        };
        Ok((pipeline, stages, active, fields))
    }

    /// Load every stage document, falling back to empty maps on failure
    async fn fetch_documents(&mut self, pipeline_id: PipelineId) -> StageDocuments {
        let store = Arc::clone(&self.store);
        match store.load(self.enquiry_id, pipeline_id).await {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(
                    enquiry_id = %self.enquiry_id,
                    pipeline_id = %pipeline_id,
                    "stage documents unavailable, showing empty values"
                );
                self.report(e.into_document_load());
                StageDocuments::new()
            }
        }
    }

    /// Make another stage of the current pipeline active.
    ///
    /// Only allowed while `Viewing`. Renders from the documents already in
    /// memory.
    pub async fn select_stage(&mut self, stage_id: StageId) -> CrmResult<()> {
        if let Err(e) = self.state.require(SessionState::Viewing, "select a stage") {
            return Err(self.report(e));
        }
        let Some(index) = self.stages.iter().position(|s| s.id == stage_id) else {
            return Err(self.report(CrmError::NotFound(format!("stage {}", stage_id))));
        };

        let store = Arc::clone(&self.store);
        let fetched = self.registry.fields_for(&*store, stage_id).await;
        let fields = match fetched {
            Ok(fields) => fields,
            Err(e) => return Err(self.report(e.into_schema_fetch())),
        };

        self.active = Some(ActiveStage {
            stage: self.stages[index].clone(),
            index,
        });
        self.active_fields = fields;
        self.events.stage_selected(self.enquiry_id, stage_id, index);
        tracing::debug!(stage_id = %stage_id, index, "selected stage");
        Ok(())
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Start editing the active stage from its stored values
    pub fn begin_edit(&mut self) -> CrmResult<()> {
        let Some(stage_id) = self.active_stage_id() else {
            let err = CrmError::InvalidStateTransition("Cannot edit without an active stage".into());
            return Err(self.report(err));
        };
        if let Err(e) = self.enter(SessionState::Editing, "edit") {
            return Err(self.report(e));
        }
        let (values, version) = self
            .documents
            .get(&stage_id)
            .map(|doc| (doc.values.clone(), doc.version))
            .unwrap_or_default();
        self.drafts.begin(stage_id, values, version);
        Ok(())
    }

    pub async fn set_text(&mut self, field_id: FieldId, text: impl Into<String>) -> CrmResult<()> {
        self.set_value(field_id, FieldValue::Text(text.into())).await
    }

    pub async fn set_checkbox(&mut self, field_id: FieldId, checked: bool) -> CrmResult<()> {
        self.set_value(field_id, FieldValue::Bool(checked)).await
    }

    /// Remove a field's value from the draft
    pub async fn clear_field(&mut self, field_id: FieldId) -> CrmResult<()> {
        let stage_id = match self.field_stage(field_id, None) {
            Ok(stage_id) => stage_id,
            Err(e) => return Err(self.report(e)),
        };
        let previous = self.drafts.remove(stage_id, field_id);
        self.release_replaced(previous).await;
        Ok(())
    }

    /// Upload a file and reference it from a file field of the draft.
    ///
    /// The upload happens immediately. On failure the field keeps its value.
    pub async fn attach_file(
        &mut self,
        field_id: FieldId,
        file_name: &str,
        bytes: &[u8],
    ) -> CrmResult<UploadedFile> {
        let stage_id = match self.field_stage(field_id, Some(FieldType::File)) {
            Ok(stage_id) => stage_id,
            Err(e) => return Err(self.report(e)),
        };

        let uploaded = self
            .files
            .upload(file_name, bytes, self.uploaded_by.as_deref())
            .await;
        let upload = match uploaded {
            Ok(upload) => upload,
            Err(e) => return Err(self.report(e.into_file_transfer())),
        };

        self.drafts.track_upload(upload.file_path.clone());
        let previous =
            self.drafts
                .set(stage_id, field_id, FieldValue::File(upload.file_path.clone()));
        self.release_replaced(previous).await;
        Ok(upload)
    }

    async fn set_value(&mut self, field_id: FieldId, value: FieldValue) -> CrmResult<()> {
        let expected = match &value {
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Bool(_) => FieldType::Checkbox,
            FieldValue::File(_) => FieldType::File,
        };
        let stage_id = match self.field_stage(field_id, Some(expected)) {
            Ok(stage_id) => stage_id,
            Err(e) => return Err(self.report(e)),
        };
        let previous = self.drafts.set(stage_id, field_id, value);
        self.release_replaced(previous).await;
        Ok(())
    }

    /// Stage of an editable field of the active stage, checking its type
    fn field_stage(&self, field_id: FieldId, expected: Option<FieldType>) -> CrmResult<StageId> {
        self.state.require(SessionState::Editing, "change a field")?;
        let field = self
            .active_fields
            .iter()
            .find(|f| f.id == field_id)
            .ok_or_else(|| CrmError::NotFound(format!("field {} in the active stage", field_id)))?;
        match expected {
            Some(field_type) if field.field_type != field_type => {
                Err(CrmError::FieldTypeMismatch {
                    field_id: field_id.get(),
                    expected: field.field_type.to_string(),
                })
            }
            _ => Ok(field.stage_id),
        }
    }

    /// Delete a blob uploaded earlier in this edit once nothing points at it
    async fn release_replaced(&mut self, previous: Option<FieldValue>) {
        if let Some(FieldValue::File(path)) = previous {
            if self.drafts.release_upload(&path) && self.config.discard_uncommitted_uploads {
                self.discard_upload(&path).await;
            }
        }
    }

    async fn discard_upload(&self, path: &str) {
        if let Err(e) = self.files.discard(path).await {
            tracing::warn!(path, error = %e, "could not discard uncommitted upload");
        }
    }

    /// Drop all drafts, cleaning up uploads only they referenced
    async fn discard_drafts(&mut self) {
        let orphans = self.drafts.discard();
        if self.config.discard_uncommitted_uploads {
            for path in &orphans {
                self.discard_upload(path).await;
            }
        } else if !orphans.is_empty() {
            tracing::debug!(count = orphans.len(), "keeping uncommitted uploads");
        }
    }

    // ========================================================================
    // Commit / cancel
    // ========================================================================

    /// Persist the drafts and move the enquiry to the active stage.
    ///
    /// Documents and pointer are written together. On failure the session
    /// returns to `Editing` with every draft intact.
    pub async fn commit(&mut self) -> CrmResult<Vec<StageDocument>> {
        if let Err(e) = self.enter(SessionState::Committing, "commit") {
            return Err(self.report(e));
        }

        let (batch, pointer) = match self.build_commit() {
            Ok(parts) => parts,
            Err(e) => {
                self.enter(SessionState::Editing, "recover from failed commit")?;
                return Err(self.report(e));
            }
        };

        let store = Arc::clone(&self.store);
        match store.commit_session(&batch, &pointer).await {
            Ok(stored) => {
                for doc in &stored {
                    self.documents.insert(doc.key.stage_id, doc.clone());
                }
                self.drafts.committed();
                self.pointer = pointer;
                self.enter(SessionState::Viewing, "finish commit")?;

                self.events
                    .committed(self.enquiry_id, batch.pipeline_id, stored.len());
                self.record(Notice::success("Data saved successfully!"));
                tracing::info!(
                    enquiry_id = %self.enquiry_id,
                    stages = stored.len(),
                    "committed drafts"
                );
                Ok(stored)
            }
            Err(e) => {
                self.enter(SessionState::Editing, "recover from failed commit")?;
                Err(self.report(e.into_commit()))
            }
        }
    }

    fn build_commit(&self) -> CrmResult<(CommitBatch, EnquiryPointer)> {
        let pipeline_id = self
            .pipeline
            .as_ref()
            .map(|p| p.id)
            .ok_or_else(|| CrmError::Commit("no pipeline selected".into()))?;
        let optimistic = self.config.concurrency == ConcurrencyMode::Optimistic;
        let mut batch = CommitBatch::new(self.enquiry_id, pipeline_id);

        if self.config.commit_scope == CommitScope::AllLoaded {
            for (stage_id, doc) in &self.documents {
                if self.drafts.get(*stage_id).is_none() {
                    batch.push(*stage_id, doc.values.clone(), optimistic.then_some(doc.version));
                }
            }
        }
        for (stage_id, draft) in self.drafts.iter() {
            batch.push(
                *stage_id,
                draft.values.clone(),
                optimistic.then_some(draft.base_version),
            );
        }
        batch.entries.sort_by_key(|e| e.stage_id);

        let pointer = EnquiryPointer {
            enquiry_id: self.enquiry_id,
            pipeline_id: Some(pipeline_id),
            current_stage_id: self.active_stage_id(),
        };
        Ok((batch, pointer))
    }

    /// Throw away the drafts and show what is stored.
    ///
    /// Documents are reloaded from the store rather than rolled back locally.
    /// If the reload fails every stage renders empty.
    pub async fn cancel(&mut self) -> CrmResult<()> {
        if let Err(e) = self.enter(SessionState::Viewing, "cancel") {
            return Err(self.report(e));
        }
        self.discard_drafts().await;
        if let Some(pipeline_id) = self.pipeline.as_ref().map(|p| p.id) {
            self.documents = self.fetch_documents(pipeline_id).await;
        }
        tracing::debug!(enquiry_id = %self.enquiry_id, "cancelled edit");
        Ok(())
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub async fn download_file(&mut self, file_path: &str) -> CrmResult<FileDownload> {
        let fetched = self.files.download(file_path).await;
        match fetched {
            Ok(download) => Ok(download),
            Err(e) => Err(self.report(e.into_file_transfer())),
        }
    }

    pub async fn preview_file(&mut self, file_path: &str) -> CrmResult<FilePreview> {
        let fetched = self.files.preview(file_path).await;
        match fetched {
            Ok(preview) => Ok(preview),
            Err(e) => Err(self.report(e.into_file_transfer())),
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Snapshot for rendering. While editing, field values come from the draft.
    pub fn view(&self) -> SessionView {
        let stage_id = self.active_stage_id();
        let empty = ValueMap::new();
        let values = stage_id
            .and_then(|id| match self.state {
                SessionState::Editing | SessionState::Committing => {
                    self.drafts.get(id).map(|d| &d.values)
                }
                _ => None,
            })
            .or_else(|| stage_id.and_then(|id| self.documents.get(&id)).map(|d| &d.values))
            .unwrap_or(&empty);

        SessionView {
            enquiry_id: self.enquiry_id,
            state: self.state,
            pipelines: self.pipelines.clone(),
            pipeline: self.pipeline.clone(),
            stages: self.stages.clone(),
            active_index: self.active.as_ref().map(|a| a.index),
            active_stage: self.active.as_ref().map(|a| a.stage.clone()),
            fields: render_fields(&self.active_fields, values),
            dirty: !self.drafts.is_empty(),
            latest_notice: self.notices.latest().cloned(),
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn active_stage_id(&self) -> Option<StageId> {
        self.active.as_ref().map(|a| a.stage.id)
    }

    fn enter(&mut self, next: SessionState, action: &str) -> CrmResult<()> {
        let from = self.state;
        self.state = from.transition(next, action)?;
        self.events
            .state_changed(self.enquiry_id, from.name(), next.name());
        tracing::debug!(enquiry_id = %self.enquiry_id, from = %from, to = %next, "session transition");
        Ok(())
    }

    fn record(&mut self, notice: Notice) {
        self.notices.push(notice.clone());
        self.events.notice(self.enquiry_id, notice);
    }

    /// Record a failure as a notice and hand the error back
    fn report(&mut self, error: CrmError) -> CrmError {
        tracing::warn!(
            enquiry_id = %self.enquiry_id,
            kind = ?error.kind(),
            error = %error,
            "session operation failed"
        );
        self.record(Notice::from_error(&error));
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryBlobStore;
    use crate::registry::RenderedValue;
    use crate::repository::{
        DocumentRepository, EnquiryRepository, FailurePlan, MemoryStore, SchemaAdmin,
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        blobs: Arc<MemoryBlobStore>,
        sales: PipelineId,
        lead: StageId,
        qualified: StageId,
        notes: FieldId,
        approved: FieldId,
        quote: FieldId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sales = store.create_pipeline("Sales").await.unwrap().id;
        let lead = store.create_stage(sales, "Lead").await.unwrap().id;
        let qualified = store.create_stage(sales, "Qualified").await.unwrap().id;
        store.create_stage(sales, "Won").await.unwrap();
        let notes = store
            .create_field(qualified, "Notes", FieldType::Text)
            .await
            .unwrap()
            .id;
        let approved = store
            .create_field(qualified, "Approved", FieldType::Checkbox)
            .await
            .unwrap()
            .id;
        let quote = store
            .create_field(qualified, "Quote", FieldType::File)
            .await
            .unwrap()
            .id;
        store.put_enquiry(EnquiryPointer::unassigned(EnquiryId(1))).unwrap();
        Fixture {
            store,
            blobs: Arc::new(MemoryBlobStore::new()),
            sales,
            lead,
            qualified,
            notes,
            approved,
            quote,
        }
    }

    async fn open(f: &Fixture, config: SessionConfig) -> PipelineSession {
        let files = FileReferenceResolver::new(f.blobs.clone(), f.store.clone());
        PipelineSession::open(f.store.clone(), files, config, EnquiryId(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_opens_unselected_without_pipeline() {
        let f = fixture().await;
        let session = open(&f, SessionConfig::default()).await;
        let view = session.view();
        assert_eq!(view.state, SessionState::Unselected);
        assert_eq!(view.pipelines.len(), 1);
        assert!(view.fields.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_enquiry_fails_to_open() {
        let f = fixture().await;
        let files = FileReferenceResolver::new(f.blobs.clone(), f.store.clone());
        let result =
            PipelineSession::open(f.store.clone(), files, SessionConfig::default(), EnquiryId(42))
                .await;
        assert!(matches!(result, Err(CrmError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_select_pipeline_starts_at_first_stage() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();

        let view = session.view();
        assert_eq!(view.state, SessionState::Viewing);
        assert_eq!(view.active_index, Some(0));
        assert_eq!(view.stage_name(), Some("Lead"));
    }

    #[tokio::test]
    async fn test_select_stage_only_while_viewing() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        assert_eq!(session.view().fields.len(), 3);

        session.begin_edit().unwrap();
        assert!(matches!(
            session.select_stage(f.lead).await,
            Err(CrmError::InvalidStateTransition(_))
        ));
        assert!(matches!(
            session.select_pipeline(f.sales).await,
            Err(CrmError::InvalidStateTransition(_))
        ));
        assert_eq!(session.state(), SessionState::Editing);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_not_found() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        assert!(matches!(
            session.select_stage(StageId(999)).await,
            Err(CrmError::NotFound(_))
        ));
        assert_eq!(session.view().stage_name(), Some("Lead"));
    }

    #[tokio::test]
    async fn test_type_checked_edits() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();

        // Not editing yet
        assert!(session.set_text(f.notes, "x").await.is_err());

        session.begin_edit().unwrap();
        assert!(matches!(
            session.set_checkbox(f.notes, true).await,
            Err(CrmError::FieldTypeMismatch { .. })
        ));
        assert!(matches!(
            session.set_text(FieldId(12345), "x").await,
            Err(CrmError::NotFound(_))
        ));
        session.set_text(f.notes, "looks good").await.unwrap();
        session.set_checkbox(f.approved, true).await.unwrap();
        assert!(session.view().dirty);
    }

    #[tokio::test]
    async fn test_commit_writes_pointer_and_documents() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();
        session.set_text(f.notes, "looks good").await.unwrap();

        let stored = session.commit().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(session.state(), SessionState::Viewing);
        assert!(!session.view().dirty);

        let pointer = f.store.get_pointer(EnquiryId(1)).await.unwrap();
        assert_eq!(pointer.pipeline_id, Some(f.sales));
        assert_eq!(pointer.current_stage_id, Some(f.qualified));
        assert_eq!(
            session.notices().last().map(|n| n.message.as_str()),
            Some("Data saved successfully!")
        );
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_draft() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();
        session.set_text(f.notes, "keep me").await.unwrap();

        f.store
            .set_failures(FailurePlan {
                pointer_update: true,
                ..Default::default()
            })
            .unwrap();
        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, CrmError::Commit(_)));
        assert_eq!(session.state(), SessionState::Editing);
        assert_eq!(f.store.document_count().unwrap(), 0);

        let draft = session.drafts().get(f.qualified).unwrap();
        assert_eq!(draft.values[&f.notes], FieldValue::Text("keep me".into()));

        // Retry succeeds once the store recovers
        f.store.heal().unwrap();
        session.commit().await.unwrap();
        assert_eq!(f.store.document_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_replaced_upload_is_discarded() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();

        let first = session.attach_file(f.quote, "v1.pdf", b"1").await.unwrap();
        let second = session.attach_file(f.quote, "v2.pdf", b"2").await.unwrap();
        assert!(!f.blobs.contains(&first.file_path));
        assert!(f.blobs.contains(&second.file_path));

        session.clear_field(f.quote).await.unwrap();
        assert!(f.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_field_untouched() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();

        f.blobs.fail_transfers(true);
        let err = session.attach_file(f.quote, "q.pdf", b"x").await.unwrap_err();
        assert!(matches!(err, CrmError::FileTransfer(_)));
        assert_eq!(session.state(), SessionState::Editing);
        assert!(session
            .drafts()
            .get(f.qualified)
            .unwrap()
            .values
            .get(&f.quote)
            .is_none());
        assert_eq!(
            session.notices().last().and_then(|n| n.kind),
            Some(crate::error::ErrorKind::FileTransfer)
        );
    }

    #[tokio::test]
    async fn test_optimistic_commit_detects_concurrent_write() {
        let f = fixture().await;
        let config = SessionConfig {
            concurrency: ConcurrencyMode::Optimistic,
            ..Default::default()
        };
        let mut session = open(&f, config).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();
        session.set_text(f.notes, "mine").await.unwrap();

        // Another client writes the same stage first
        let key = crate::model::DocumentKey {
            enquiry_id: EnquiryId(1),
            pipeline_id: f.sales,
            stage_id: f.qualified,
        };
        let mut theirs = ValueMap::new();
        theirs.insert(f.notes, FieldValue::Text("theirs".into()));
        f.store.upsert(key, &theirs).await.unwrap();

        let err = session.commit().await.unwrap_err();
        assert!(matches!(err, CrmError::VersionConflict { .. }));
        assert_eq!(session.state(), SessionState::Editing);
    }

    #[tokio::test]
    async fn test_all_loaded_scope_rewrites_every_document() {
        let f = fixture().await;
        let key = crate::model::DocumentKey {
            enquiry_id: EnquiryId(1),
            pipeline_id: f.sales,
            stage_id: f.lead,
        };
        f.store.upsert(key, &ValueMap::new()).await.unwrap();

        let config = SessionConfig {
            commit_scope: CommitScope::AllLoaded,
            ..Default::default()
        };
        let mut session = open(&f, config).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        session.begin_edit().unwrap();
        session.set_checkbox(f.approved, true).await.unwrap();

        let stored = session.commit().await.unwrap();
        let stages: Vec<StageId> = stored.iter().map(|d| d.key.stage_id).collect();
        assert_eq!(stages, vec![f.lead, f.qualified]);
    }

    #[tokio::test]
    async fn test_schema_failure_keeps_previous_schema() {
        let f = fixture().await;
        let support = f.store.create_pipeline("Support").await.unwrap().id;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();

        f.store
            .set_failures(FailurePlan {
                schema_fetch: true,
                ..Default::default()
            })
            .unwrap();
        let err = session.select_pipeline(support).await.unwrap_err();
        assert!(matches!(err, CrmError::SchemaFetch(_)));

        let view = session.view();
        assert_eq!(view.state, SessionState::Viewing);
        assert_eq!(view.pipeline.map(|p| p.name), Some("Sales".to_string()));
        assert_eq!(view.stages.len(), 3);
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        let mut rx = session.subscribe();
        session.select_pipeline(f.sales).await.unwrap();

        let mut saw_selection = false;
        while let Ok(event) = rx.try_recv() {
            if let SessionEvent::PipelineSelected { pipeline_id, .. } = event {
                assert_eq!(pipeline_id, f.sales);
                saw_selection = true;
            }
        }
        assert!(saw_selection);
    }

    #[tokio::test]
    async fn test_reselecting_pipeline_picks_up_new_fields() {
        let f = fixture().await;
        let support = f.store.create_pipeline("Support").await.unwrap().id;
        f.store.create_stage(support, "Triage").await.unwrap();

        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        assert!(session.view().fields.is_empty());

        // Administrator adds a field to Lead while the session is open
        let called = f
            .store
            .create_field(f.lead, "Called back", FieldType::Checkbox)
            .await
            .unwrap()
            .id;

        session.select_pipeline(support).await.unwrap();
        session.select_pipeline(f.sales).await.unwrap();
        let view = session.view();
        assert_eq!(view.fields.len(), 1);
        assert_eq!(view.fields[0].field.id, called);

        session.begin_edit().unwrap();
        session.set_checkbox(called, true).await.unwrap();
        session.commit().await.unwrap();
        assert_eq!(session.view().fields[0].value, RenderedValue::Checkbox(true));
    }

    #[tokio::test]
    async fn test_refresh_catalog_reloads_active_fields() {
        let f = fixture().await;
        let mut session = open(&f, SessionConfig::default()).await;
        session.select_pipeline(f.sales).await.unwrap();
        session.select_stage(f.qualified).await.unwrap();
        assert_eq!(session.view().fields.len(), 3);

        let budget = f
            .store
            .create_field(f.qualified, "Budget", FieldType::Text)
            .await
            .unwrap()
            .id;
        session.refresh_catalog().await.unwrap();

        let view = session.view();
        assert_eq!(view.fields.len(), 4);
        assert_eq!(view.fields[3].field.id, budget);
        session.begin_edit().unwrap();
        assert!(session.set_text(budget, "10k").await.is_ok());
    }
}
