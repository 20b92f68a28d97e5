//! In-memory drafts of stage value maps awaiting commit

use crate::model::{FieldId, FieldValue, StageId, ValueMap};
use std::collections::{BTreeMap, BTreeSet};

/// Edited copy of one stage's value map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub values: ValueMap,
    /// Version of the stored document the draft was taken from, 0 if none
    pub base_version: i64,
}

/// Every draft of a session plus the uploads they reference
#[derive(Debug, Clone, Default)]
pub struct DraftSet {
    drafts: BTreeMap<StageId, Draft>,
    /// Blobs uploaded during this edit that no committed document references
    pending_uploads: BTreeSet<String>,
}

impl DraftSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start drafting a stage unless a draft for it already exists
    pub fn begin(&mut self, stage_id: StageId, values: ValueMap, base_version: i64) {
        self.drafts.entry(stage_id).or_insert(Draft {
            values,
            base_version,
        });
    }

    pub fn get(&self, stage_id: StageId) -> Option<&Draft> {
        self.drafts.get(&stage_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StageId, &Draft)> {
        self.drafts.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.drafts.is_empty()
    }

    /// Set a value, returning the one it replaced.
    ///
    /// Does nothing and returns `None` when the stage has no draft.
    pub fn set(&mut self, stage_id: StageId, field_id: FieldId, value: FieldValue) -> Option<FieldValue> {
        self.drafts
            .get_mut(&stage_id)
            .and_then(|draft| draft.values.insert(field_id, value))
    }

    pub fn remove(&mut self, stage_id: StageId, field_id: FieldId) -> Option<FieldValue> {
        self.drafts
            .get_mut(&stage_id)
            .and_then(|draft| draft.values.remove(&field_id))
    }

    pub fn track_upload(&mut self, path: impl Into<String>) {
        self.pending_uploads.insert(path.into());
    }

    /// Stop tracking `path`; true if it was an uncommitted upload
    pub fn release_upload(&mut self, path: &str) -> bool {
        self.pending_uploads.remove(path)
    }

    pub fn pending_uploads(&self) -> impl Iterator<Item = &str> {
        self.pending_uploads.iter().map(String::as_str)
    }

    /// Drop every draft and hand back the uploads they left behind
    pub fn discard(&mut self) -> Vec<String> {
        self.drafts.clear();
        std::mem::take(&mut self.pending_uploads).into_iter().collect()
    }

    /// Drop every draft after a successful commit; uploads are now referenced
    pub fn committed(&mut self) {
        self.drafts.clear();
        self.pending_uploads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_keeps_existing_draft() {
        let mut drafts = DraftSet::new();
        drafts.begin(StageId(1), ValueMap::new(), 0);
        drafts.set(StageId(1), FieldId(1), FieldValue::Bool(true));

        let mut fresh = ValueMap::new();
        fresh.insert(FieldId(1), FieldValue::Bool(false));
        drafts.begin(StageId(1), fresh, 3);

        let draft = drafts.get(StageId(1)).unwrap();
        assert_eq!(draft.values[&FieldId(1)], FieldValue::Bool(true));
        assert_eq!(draft.base_version, 0);
    }

    #[test]
    fn test_set_without_draft_is_ignored() {
        let mut drafts = DraftSet::new();
        assert!(drafts
            .set(StageId(1), FieldId(1), FieldValue::Text("x".into()))
            .is_none());
        assert!(drafts.is_empty());
    }

    #[test]
    fn test_set_returns_replaced_value() {
        let mut drafts = DraftSet::new();
        drafts.begin(StageId(1), ValueMap::new(), 0);
        drafts.set(StageId(1), FieldId(2), FieldValue::File("a".into()));
        let previous = drafts.set(StageId(1), FieldId(2), FieldValue::File("b".into()));
        assert_eq!(previous, Some(FieldValue::File("a".into())));
        assert_eq!(
            drafts.remove(StageId(1), FieldId(2)),
            Some(FieldValue::File("b".into()))
        );
    }

    #[test]
    fn test_discard_returns_pending_uploads() {
        let mut drafts = DraftSet::new();
        drafts.begin(StageId(1), ValueMap::new(), 0);
        drafts.track_upload("1-a-x.png");
        drafts.track_upload("2-b-y.png");
        assert!(drafts.release_upload("2-b-y.png"));
        assert!(!drafts.release_upload("2-b-y.png"));

        assert_eq!(drafts.discard(), vec!["1-a-x.png".to_string()]);
        assert!(drafts.is_empty());
        assert_eq!(drafts.pending_uploads().count(), 0);
    }

    #[test]
    fn test_committed_forgets_uploads() {
        let mut drafts = DraftSet::new();
        drafts.begin(StageId(1), ValueMap::new(), 0);
        drafts.track_upload("1-a-x.png");
        drafts.committed();
        assert!(drafts.discard().is_empty());
    }
}
