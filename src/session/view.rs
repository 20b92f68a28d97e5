use super::state::SessionState;
use crate::model::{EnquiryId, Pipeline, Stage};
use crate::notice::Notice;
use crate::registry::RenderedField;
use serde::Serialize;

/// Snapshot of everything a UI needs to draw a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub enquiry_id: EnquiryId,
    pub state: SessionState,
    /// Pipelines the user can choose from
    pub pipelines: Vec<Pipeline>,
    pub pipeline: Option<Pipeline>,
    pub stages: Vec<Stage>,
    /// Zero-based index of the active stage; `None` when the pipeline is empty
    pub active_index: Option<usize>,
    pub active_stage: Option<Stage>,
    /// Fields of the active stage, showing draft values while editing
    pub fields: Vec<RenderedField>,
    /// Whether uncommitted drafts exist
    pub dirty: bool,
    pub latest_notice: Option<Notice>,
}

impl SessionView {
    pub fn is_editable(&self) -> bool {
        self.state == SessionState::Editing
    }

    pub fn stage_name(&self) -> Option<&str> {
        self.active_stage.as_ref().map(|s| s.name.as_str())
    }
}
