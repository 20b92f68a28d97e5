use super::ids::{EnquiryId, PipelineId, StageId};
use serde::{Deserialize, Serialize};

/// The two pipeline columns of an externally owned enquiry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnquiryPointer {
    pub enquiry_id: EnquiryId,
    pub pipeline_id: Option<PipelineId>,
    pub current_stage_id: Option<StageId>,
}

impl EnquiryPointer {
    /// Pointer for an enquiry that has not been attached to a pipeline
    pub fn unassigned(enquiry_id: EnquiryId) -> Self {
        Self {
            enquiry_id,
            pipeline_id: None,
            current_stage_id: None,
        }
    }
}
