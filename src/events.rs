use crate::model::{EnquiryId, PipelineId, StageId};
use crate::notice::Notice;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Event names - centralized for consistency
pub mod event_names {
    pub const STATE_CHANGED: &str = "session:state-changed";
    pub const PIPELINE_SELECTED: &str = "session:pipeline-selected";
    pub const STAGE_SELECTED: &str = "session:stage-selected";
    pub const COMMITTED: &str = "session:committed";
    pub const NOTICE: &str = "session:notice";
}

/// Something observable happened in a pipeline session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    StateChanged {
        enquiry_id: EnquiryId,
        from: String,
        to: String,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    PipelineSelected {
        enquiry_id: EnquiryId,
        pipeline_id: PipelineId,
        stage_count: usize,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    StageSelected {
        enquiry_id: EnquiryId,
        stage_id: StageId,
        index: usize,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    Committed {
        enquiry_id: EnquiryId,
        pipeline_id: PipelineId,
        stages_written: usize,
        timestamp: String,
    },
    #[serde(rename_all = "camelCase")]
    Notice {
        enquiry_id: EnquiryId,
        notice: Notice,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StateChanged { .. } => event_names::STATE_CHANGED,
            SessionEvent::PipelineSelected { .. } => event_names::PIPELINE_SELECTED,
            SessionEvent::StageSelected { .. } => event_names::STAGE_SELECTED,
            SessionEvent::Committed { .. } => event_names::COMMITTED,
            SessionEvent::Notice { .. } => event_names::NOTICE,
        }
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Broadcasts session events to any number of subscribers
///
/// Emitting never blocks and never fails the caller; with no subscribers the
/// event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.name(), "emitting session event");
        let _ = self.sender.send(event);
    }

    pub fn state_changed(&self, enquiry_id: EnquiryId, from: &str, to: &str) {
        self.emit(SessionEvent::StateChanged {
            enquiry_id,
            from: from.to_string(),
            to: to.to_string(),
            timestamp: now(),
        });
    }

    pub fn pipeline_selected(&self, enquiry_id: EnquiryId, pipeline_id: PipelineId, stage_count: usize) {
        self.emit(SessionEvent::PipelineSelected {
            enquiry_id,
            pipeline_id,
            stage_count,
            timestamp: now(),
        });
    }

    pub fn stage_selected(&self, enquiry_id: EnquiryId, stage_id: StageId, index: usize) {
        self.emit(SessionEvent::StageSelected {
            enquiry_id,
            stage_id,
            index,
            timestamp: now(),
        });
    }

    pub fn committed(&self, enquiry_id: EnquiryId, pipeline_id: PipelineId, stages_written: usize) {
        self.emit(SessionEvent::Committed {
            enquiry_id,
            pipeline_id,
            stages_written,
            timestamp: now(),
        });
    }

    pub fn notice(&self, enquiry_id: EnquiryId, notice: Notice) {
        self.emit(SessionEvent::Notice { enquiry_id, notice });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(64)
    }
}
