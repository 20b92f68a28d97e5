//! In-memory repository for development and testing
//!
//! Mirrors the SQLite backend's semantics (rank ordering, cascades, atomic
//! batches, version bumps) without touching disk. Failures can be injected
//! per operation to exercise the session's fallback paths.

use super::traits::{
    DocumentRepository, EnquiryRepository, SchemaAdmin, SchemaRepository, SessionStore, UploadLog,
};
use crate::error::{CrmError, CrmResult};
use crate::model::schema::{normalize_name, sort_fields, sort_stages};
use crate::model::{
    CommitBatch, DocumentKey, EnquiryId, EnquiryPointer, Field, FieldId, FieldType, Pipeline,
    PipelineId, Stage, StageDocument, StageDocuments, StageId, UploadedFile,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

/// Operations that can be made to fail on demand
#[derive(Debug, Default, Clone)]
pub struct FailurePlan {
    pub schema_fetch: bool,
    pub document_load: bool,
    /// Fail any batch containing this stage, after earlier entries were applied
    pub upsert_stage: Option<StageId>,
    pub pointer_update: bool,
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    next_id: i64,
    pipelines: BTreeMap<PipelineId, Pipeline>,
    stages: BTreeMap<StageId, Stage>,
    fields: BTreeMap<FieldId, Field>,
    documents: BTreeMap<DocumentKey, StageDocument>,
    enquiries: HashMap<EnquiryId, EnquiryPointer>,
    uploads: HashMap<String, UploadedFile>,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn stages_of(&self, pipeline_id: PipelineId) -> Vec<Stage> {
        let mut stages: Vec<Stage> = self
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        sort_stages(&mut stages);
        stages
    }

    fn remove_stage(&mut self, id: StageId) {
        self.stages.remove(&id);
        self.fields.retain(|_, f| f.stage_id != id);
        self.documents.retain(|k, _| k.stage_id != id);
        for pointer in self.enquiries.values_mut() {
            if pointer.current_stage_id == Some(id) {
                pointer.current_stage_id = None;
            }
        }
    }
}

/// Repository keeping everything in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    failures: Mutex<FailurePlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the failure plan
    pub fn set_failures(&self, plan: FailurePlan) -> CrmResult<()> {
        *self.failures.lock()? = plan;
        Ok(())
    }

    /// Clear every injected failure
    pub fn heal(&self) -> CrmResult<()> {
        self.set_failures(FailurePlan::default())
    }

    fn failures(&self) -> CrmResult<FailurePlan> {
        Ok(self.failures.lock()?.clone())
    }

    /// Create an enquiry record with an arbitrary pointer, stale ids included
    pub fn put_enquiry(&self, pointer: EnquiryPointer) -> CrmResult<()> {
        self.state.lock()?.enquiries.insert(pointer.enquiry_id, pointer);
        Ok(())
    }

    /// Number of stored stage documents across all enquiries
    pub fn document_count(&self) -> CrmResult<usize> {
        Ok(self.state.lock()?.documents.len())
    }

    fn apply_batch(state: &mut MemoryState, batch: &CommitBatch, fail_on: Option<StageId>)
        -> CrmResult<Vec<StageDocument>> {
        let mut stored = Vec::with_capacity(batch.entries.len());
        for entry in &batch.entries {
            let key = batch.key_for(entry.stage_id);
            if fail_on == Some(entry.stage_id) {
                return Err(CrmError::Commit(format!(
                    "stage {}: injected write failure",
                    entry.stage_id
                )));
            }
            match state.stages.get(&entry.stage_id) {
                Some(stage) if stage.pipeline_id == batch.pipeline_id => {}
                Some(_) => {
                    return Err(CrmError::Commit(format!(
                        "stage {} does not belong to pipeline {}",
                        entry.stage_id, batch.pipeline_id
                    )))
                }
                None => {
                    return Err(CrmError::Commit(format!("stage {} not found", entry.stage_id)))
                }
            }

            let current = state.documents.get(&key);
            let actual = current.map(|d| d.version).unwrap_or(0);
            if let Some(expected) = entry.expected_version {
                if expected != actual {
                    return Err(CrmError::VersionConflict {
                        stage_id: entry.stage_id.get(),
                        expected,
                        actual,
                    });
                }
            }
            let version = match current {
                Some(doc) if doc.values == entry.values => doc.version,
                Some(doc) => doc.version + 1,
                None => 1,
            };
            let doc = StageDocument {
                key,
                values: entry.values.clone(),
                version,
            };
            state.documents.insert(key, doc.clone());
            stored.push(doc);
        }
        Ok(stored)
    }

    fn apply_pointer(state: &mut MemoryState, pointer: &EnquiryPointer) -> CrmResult<()> {
        match state.enquiries.get_mut(&pointer.enquiry_id) {
            Some(existing) => {
                *existing = *pointer;
                Ok(())
            }
            None => Err(CrmError::NotFound(format!("enquiry {}", pointer.enquiry_id))),
        }
    }
}

#[async_trait]
impl SchemaRepository for MemoryStore {
    async fn list_pipelines(&self) -> CrmResult<Vec<Pipeline>> {
        if self.failures()?.schema_fetch {
            return Err(CrmError::SchemaFetch("injected failure listing pipelines".into()));
        }
        Ok(self.state.lock()?.pipelines.values().cloned().collect())
    }

    async fn list_stages(&self, pipeline_id: PipelineId) -> CrmResult<Vec<Stage>> {
        if self.failures()?.schema_fetch {
            return Err(CrmError::SchemaFetch("injected failure listing stages".into()));
        }
        Ok(self.state.lock()?.stages_of(pipeline_id))
    }

    async fn list_fields(&self, stage_id: StageId) -> CrmResult<Vec<Field>> {
        if self.failures()?.schema_fetch {
            return Err(CrmError::SchemaFetch("injected failure listing fields".into()));
        }
        let mut fields: Vec<Field> = self
            .state
            .lock()?
            .fields
            .values()
            .filter(|f| f.stage_id == stage_id)
            .cloned()
            .collect();
        sort_fields(&mut fields);
        Ok(fields)
    }
}

#[async_trait]
impl SchemaAdmin for MemoryStore {
    async fn create_pipeline(&self, name: &str) -> CrmResult<Pipeline> {
        let name = normalize_name(name, "pipeline")?;
        let mut state = self.state.lock()?;
        let pipeline = Pipeline {
            id: PipelineId(state.allocate()),
            name,
        };
        state.pipelines.insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn rename_pipeline(&self, id: PipelineId, name: &str) -> CrmResult<Pipeline> {
        let name = normalize_name(name, "pipeline")?;
        let mut state = self.state.lock()?;
        let pipeline = state
            .pipelines
            .get_mut(&id)
            .ok_or_else(|| CrmError::NotFound(format!("pipeline {}", id)))?;
        pipeline.name = name;
        Ok(pipeline.clone())
    }

    async fn delete_pipeline(&self, id: PipelineId) -> CrmResult<()> {
        let mut state = self.state.lock()?;
        if state.pipelines.remove(&id).is_none() {
            return Err(CrmError::NotFound(format!("pipeline {}", id)));
        }
        for stage in state.stages_of(id) {
            state.remove_stage(stage.id);
        }
        state.documents.retain(|k, _| k.pipeline_id != id);
        for pointer in state.enquiries.values_mut() {
            if pointer.pipeline_id == Some(id) {
                pointer.pipeline_id = None;
            }
        }
        Ok(())
    }

    async fn create_stage(&self, pipeline_id: PipelineId, name: &str) -> CrmResult<Stage> {
        let name = normalize_name(name, "stage")?;
        let mut state = self.state.lock()?;
        if !state.pipelines.contains_key(&pipeline_id) {
            return Err(CrmError::NotFound(format!("pipeline {}", pipeline_id)));
        }
        let rank = state
            .stages_of(pipeline_id)
            .iter()
            .map(|s| s.rank)
            .max()
            .map_or(0, |r| r + 1);
        let stage = Stage {
            id: StageId(state.allocate()),
            pipeline_id,
            name,
            rank,
        };
        state.stages.insert(stage.id, stage.clone());
        Ok(stage)
    }

    async fn rename_stage(&self, id: StageId, name: &str) -> CrmResult<Stage> {
        let name = normalize_name(name, "stage")?;
        let mut state = self.state.lock()?;
        let stage = state
            .stages
            .get_mut(&id)
            .ok_or_else(|| CrmError::NotFound(format!("stage {}", id)))?;
        stage.name = name;
        Ok(stage.clone())
    }

    async fn delete_stage(&self, id: StageId) -> CrmResult<()> {
        let mut state = self.state.lock()?;
        if !state.stages.contains_key(&id) {
            return Err(CrmError::NotFound(format!("stage {}", id)));
        }
        state.remove_stage(id);
        Ok(())
    }

    async fn reorder_stages(
        &self,
        pipeline_id: PipelineId,
        order: &[StageId],
    ) -> CrmResult<Vec<Stage>> {
        let mut state = self.state.lock()?;
        if !state.pipelines.contains_key(&pipeline_id) {
            return Err(CrmError::NotFound(format!("pipeline {}", pipeline_id)));
        }
        let existing: HashSet<StageId> =
            state.stages_of(pipeline_id).iter().map(|s| s.id).collect();
        let requested: HashSet<StageId> = order.iter().copied().collect();
        if requested.len() != order.len() || requested != existing {
            return Err(CrmError::InvalidInput(format!(
                "new order must list each of the {} stages of pipeline {} exactly once",
                existing.len(),
                pipeline_id
            )));
        }
        for (rank, id) in order.iter().enumerate() {
            if let Some(stage) = state.stages.get_mut(id) {
                stage.rank = rank as i64;
            }
        }
        Ok(state.stages_of(pipeline_id))
    }

    async fn create_field(
        &self,
        stage_id: StageId,
        name: &str,
        field_type: FieldType,
    ) -> CrmResult<Field> {
        let name = normalize_name(name, "field")?;
        let mut state = self.state.lock()?;
        if !state.stages.contains_key(&stage_id) {
            return Err(CrmError::NotFound(format!("stage {}", stage_id)));
        }
        let rank = state
            .fields
            .values()
            .filter(|f| f.stage_id == stage_id)
            .map(|f| f.rank)
            .max()
            .map_or(0, |r| r + 1);
        let field = Field {
            id: FieldId(state.allocate()),
            stage_id,
            name,
            field_type,
            rank,
        };
        state.fields.insert(field.id, field.clone());
        Ok(field)
    }

    async fn update_field(
        &self,
        id: FieldId,
        name: &str,
        field_type: FieldType,
    ) -> CrmResult<Field> {
        let name = normalize_name(name, "field")?;
        let mut state = self.state.lock()?;
        let field = state
            .fields
            .get_mut(&id)
            .ok_or_else(|| CrmError::NotFound(format!("field {}", id)))?;
        field.name = name;
        field.field_type = field_type;
        Ok(field.clone())
    }

    async fn delete_field(&self, id: FieldId) -> CrmResult<()> {
        let mut state = self.state.lock()?;
        state
            .fields
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| CrmError::NotFound(format!("field {}", id)))
    }
}

#[async_trait]
impl DocumentRepository for MemoryStore {
    async fn load(
        &self,
        enquiry_id: EnquiryId,
        pipeline_id: PipelineId,
    ) -> CrmResult<StageDocuments> {
        if self.failures()?.document_load {
            return Err(CrmError::DocumentLoad("injected failure loading documents".into()));
        }
        let state = self.state.lock()?;
        Ok(state
            .documents
            .values()
            .filter(|d| d.key.enquiry_id == enquiry_id && d.key.pipeline_id == pipeline_id)
            .map(|d| (d.key.stage_id, d.clone()))
            .collect())
    }

    async fn upsert_batch(&self, batch: &CommitBatch) -> CrmResult<Vec<StageDocument>> {
        let fail_on = self.failures()?.upsert_stage;
        let mut state = self.state.lock()?;
        // Apply to a copy and swap it in only when every entry succeeded
        let mut staged = state.clone();
        let stored = Self::apply_batch(&mut staged, batch, fail_on)?;
        *state = staged;
        Ok(stored)
    }
}

#[async_trait]
impl EnquiryRepository for MemoryStore {
    async fn get_pointer(&self, enquiry_id: EnquiryId) -> CrmResult<EnquiryPointer> {
        self.state
            .lock()?
            .enquiries
            .get(&enquiry_id)
            .copied()
            .ok_or_else(|| CrmError::NotFound(format!("enquiry {}", enquiry_id)))
    }

    async fn set_pointer(&self, pointer: &EnquiryPointer) -> CrmResult<()> {
        if self.failures()?.pointer_update {
            return Err(CrmError::Commit("injected failure updating enquiry".into()));
        }
        Self::apply_pointer(&mut *self.state.lock()?, pointer)
    }
}

#[async_trait]
impl UploadLog for MemoryStore {
    async fn record_upload(&self, file: &UploadedFile) -> CrmResult<()> {
        let mut state = self.state.lock()?;
        if state.uploads.contains_key(&file.file_path) {
            return Err(CrmError::InvalidInput(format!(
                "upload path {} already recorded",
                file.file_path
            )));
        }
        state.uploads.insert(file.file_path.clone(), file.clone());
        Ok(())
    }

    async fn find_upload(&self, file_path: &str) -> CrmResult<Option<UploadedFile>> {
        Ok(self.state.lock()?.uploads.get(file_path).cloned())
    }

    async fn forget_upload(&self, file_path: &str) -> CrmResult<()> {
        self.state.lock()?.uploads.remove(file_path);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn commit_session(
        &self,
        batch: &CommitBatch,
        pointer: &EnquiryPointer,
    ) -> CrmResult<Vec<StageDocument>> {
        let failures = self.failures()?;
        let mut state = self.state.lock()?;
        let mut staged = state.clone();
        let stored = Self::apply_batch(&mut staged, batch, failures.upsert_stage)?;
        if failures.pointer_update {
            return Err(CrmError::Commit("injected failure updating enquiry".into()));
        }
        Self::apply_pointer(&mut staged, pointer)?;
        *state = staged;
        Ok(stored)
    }
}
