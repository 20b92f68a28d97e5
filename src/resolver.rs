//! Active stage resolution
//!
//! An enquiry records the stage it was last committed at. That id may be
//! missing, or stale after an administrator deleted the stage, so resolution
//! always falls back to the first stage rather than failing.

use crate::model::{Stage, StageId};

/// The stage a session is positioned on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStage {
    pub stage: Stage,
    /// Zero-based position within the ordered stage list
    pub index: usize,
}

/// Resolve the active stage from an ordered stage list.
///
/// Returns the matching stage at its true index, the first stage at index 0
/// when `recorded` is `None` or not present, and `None` for an empty list.
pub fn resolve_stage(stages: &[Stage], recorded: Option<StageId>) -> Option<ActiveStage> {
    let matched = recorded.and_then(|id| stages.iter().position(|s| s.id == id));

    match matched {
        Some(index) => Some(ActiveStage {
            stage: stages[index].clone(),
            index,
        }),
        None => {
            if let Some(id) = recorded {
                tracing::debug!(stage_id = %id, "recorded stage not in pipeline, using first stage");
            }
            stages.first().map(|stage| ActiveStage {
                stage: stage.clone(),
                index: 0,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PipelineId;

    fn sales_stages() -> Vec<Stage> {
        ["Lead", "Qualified", "Won"]
            .iter()
            .enumerate()
            .map(|(i, name)| Stage {
                id: StageId(10 + i as i64),
                pipeline_id: PipelineId(1),
                name: name.to_string(),
                rank: i as i64,
            })
            .collect()
    }

    #[test]
    fn test_matching_stage_keeps_true_index() {
        let stages = sales_stages();
        for (i, stage) in stages.iter().enumerate() {
            let active = resolve_stage(&stages, Some(stage.id)).unwrap();
            assert_eq!(active.index, i);
            assert_eq!(active.stage, *stage);
        }
    }

    #[test]
    fn test_missing_stage_falls_back_to_first() {
        let stages = sales_stages();
        let active = resolve_stage(&stages, None).unwrap();
        assert_eq!(active.index, 0);
        assert_eq!(active.stage.name, "Lead");
    }

    #[test]
    fn test_deleted_stage_falls_back_to_lead() {
        let stages = sales_stages();
        let active = resolve_stage(&stages, Some(StageId(999))).unwrap();
        assert_eq!(active.index, 0);
        assert_eq!(active.stage.name, "Lead");
    }

    #[test]
    fn test_empty_pipeline_has_no_active_stage() {
        assert!(resolve_stage(&[], Some(StageId(1))).is_none());
        assert!(resolve_stage(&[], None).is_none());
    }
}
