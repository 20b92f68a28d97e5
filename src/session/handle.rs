use super::{PipelineSession, SessionView};
use crate::error::{CrmError, CrmResult};
use crate::model::StageDocument;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Shareable handle to a session for UI code running several tasks
///
/// Every operation goes through one async mutex, so at most one runs at a
/// time. [`SessionHandle::commit`] refuses to queue behind another operation
/// and reports [`CrmError::Busy`] instead.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<PipelineSession>>,
}

impl SessionHandle {
    pub fn new(session: PipelineSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Wait for exclusive access
    pub async fn lock(&self) -> MutexGuard<'_, PipelineSession> {
        self.inner.lock().await
    }

    /// Exclusive access if nothing else holds the session
    pub fn try_lock(&self) -> CrmResult<MutexGuard<'_, PipelineSession>> {
        self.inner.try_lock().map_err(|_| CrmError::Busy)
    }

    /// Commit unless another operation, such as a commit, is in flight
    pub async fn commit(&self) -> CrmResult<Vec<StageDocument>> {
        let mut session = self.try_lock().map_err(|e| {
            tracing::warn!("commit rejected, session busy");
            e
        })?;
        session.commit().await
    }

    pub async fn view(&self) -> SessionView {
        self.inner.lock().await.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::files::{FileReferenceResolver, MemoryBlobStore};
    use crate::model::{EnquiryId, EnquiryPointer, FieldType};
    use crate::repository::{MemoryStore, SchemaAdmin};

    async fn editing_handle() -> (SessionHandle, crate::model::FieldId) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = store.create_pipeline("Sales").await.unwrap().id;
        let stage = store.create_stage(pipeline, "Lead").await.unwrap().id;
        let field = store.create_field(stage, "Notes", FieldType::Text).await.unwrap().id;
        store.put_enquiry(EnquiryPointer::unassigned(EnquiryId(1))).unwrap();

        let files = FileReferenceResolver::new(Arc::new(MemoryBlobStore::new()), store.clone());
        let mut session =
            PipelineSession::open(store, files, SessionConfig::default(), EnquiryId(1))
                .await
                .unwrap();
        session.select_pipeline(pipeline).await.unwrap();
        session.begin_edit().unwrap();
        (SessionHandle::new(session), field)
    }

    #[tokio::test]
    async fn test_second_commit_is_rejected_while_busy() {
        let (handle, _) = editing_handle().await;
        let guard = handle.lock().await;
        assert!(matches!(handle.commit().await, Err(CrmError::Busy)));
        drop(guard);
    }

    #[tokio::test]
    async fn test_commit_through_handle() {
        let (handle, field) = editing_handle().await;
        handle.lock().await.set_text(field, "hello").await.unwrap();
        let stored = handle.commit().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(!handle.view().await.dirty);
    }

    #[tokio::test]
    async fn test_handle_is_shareable_across_tasks() {
        let (handle, field) = editing_handle().await;
        let clone = handle.clone();
        tokio::spawn(async move {
            clone.lock().await.set_text(field, "from task").await.unwrap();
        })
        .await
        .unwrap();
        assert!(handle.view().await.dirty);
    }
}
