//! Sparse per-stage value documents

use super::ids::{EnquiryId, FieldId, PipelineId, StageId};
use super::schema::FieldType;
use crate::error::CrmResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single stored field value
///
/// On disk values are plain JSON scalars: a string for text and for file
/// paths, a boolean for checkboxes. Stored strings therefore decode as
/// `Text`; the field type recovers the file reference when rendering (see
/// [`FieldValue::coerce_for`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawValue", into = "RawValue")]
pub enum FieldValue {
    Text(String),
    Bool(bool),
    File(String),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Bool(bool),
    Text(String),
}

impl From<RawValue> for FieldValue {
    fn from(raw: RawValue) -> Self {
        match raw {
            RawValue::Bool(b) => FieldValue::Bool(b),
            RawValue::Text(s) => FieldValue::Text(s),
        }
    }
}

impl From<FieldValue> for RawValue {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Bool(b) => RawValue::Bool(b),
            FieldValue::Text(s) | FieldValue::File(s) => RawValue::Text(s),
        }
    }
}

impl FieldValue {
    /// Whether this value is the natural representation for `field_type`
    pub fn matches(&self, field_type: FieldType) -> bool {
        matches!(
            (field_type, self),
            (FieldType::Text, FieldValue::Text(_))
                | (FieldType::Checkbox, FieldValue::Bool(_))
                | (FieldType::File, FieldValue::File(_))
        )
    }

    /// Interpret a stored value for a field of `field_type`.
    ///
    /// File paths are stored as bare strings, so a `Text` value under a file
    /// field is read as a file reference. Any other mismatch yields `None`.
    pub fn coerce_for(&self, field_type: FieldType) -> Option<FieldValue> {
        match (field_type, self) {
            (FieldType::File, FieldValue::Text(path)) => Some(FieldValue::File(path.clone())),
            _ if self.matches(field_type) => Some(self.clone()),
            _ => None,
        }
    }

    /// Short type label used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Bool(_) => "checkbox",
            FieldValue::File(_) => "file",
        }
    }
}

/// Field id to value mapping for one stage
pub type ValueMap = BTreeMap<FieldId, FieldValue>;

/// Serialize a value map to its stored JSON text
pub fn encode_values(values: &ValueMap) -> CrmResult<String> {
    Ok(serde_json::to_string(values)?)
}

/// Parse stored JSON text into a value map
pub fn decode_values(raw: &str) -> CrmResult<ValueMap> {
    Ok(serde_json::from_str(raw)?)
}

/// Composite key of a stage document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentKey {
    pub enquiry_id: EnquiryId,
    pub pipeline_id: PipelineId,
    pub stage_id: StageId,
}

/// The persisted value map for one enquiry at one stage of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageDocument {
    pub key: DocumentKey,
    pub values: ValueMap,
    /// Starts at 1, bumped only when the stored map actually changes
    pub version: i64,
}

/// All stage documents of an enquiry under one pipeline
pub type StageDocuments = BTreeMap<StageId, StageDocument>;

/// One stage's replacement map inside a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub stage_id: StageId,
    pub values: ValueMap,
    /// When set, the write is rejected unless the stored version matches.
    /// Zero means "the document must not exist yet".
    pub expected_version: Option<i64>,
}

/// A set of stage documents written as one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub enquiry_id: EnquiryId,
    pub pipeline_id: PipelineId,
    pub entries: Vec<CommitEntry>,
}

impl CommitBatch {
    pub fn new(enquiry_id: EnquiryId, pipeline_id: PipelineId) -> Self {
        Self {
            enquiry_id,
            pipeline_id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, stage_id: StageId, values: ValueMap, expected_version: Option<i64>) {
        self.entries.push(CommitEntry {
            stage_id,
            values,
            expected_version,
        });
    }

    pub fn key_for(&self, stage_id: StageId) -> DocumentKey {
        DocumentKey {
            enquiry_id: self.enquiry_id,
            pipeline_id: self.pipeline_id,
            stage_id,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_json_shape() {
        let mut values = ValueMap::new();
        values.insert(FieldId(1), FieldValue::Text("looks good".into()));
        values.insert(FieldId(2), FieldValue::Bool(true));
        values.insert(FieldId(3), FieldValue::File("1700000000000-x-quote.pdf".into()));

        let json = encode_values(&values).unwrap();
        assert_eq!(
            json,
            r#"{"1":"looks good","2":true,"3":"1700000000000-x-quote.pdf"}"#
        );

        let decoded = decode_values(&json).unwrap();
        assert_eq!(decoded[&FieldId(1)], values[&FieldId(1)]);
        assert_eq!(decoded[&FieldId(2)], values[&FieldId(2)]);
        assert_eq!(
            decoded[&FieldId(3)].coerce_for(FieldType::File),
            Some(FieldValue::File("1700000000000-x-quote.pdf".into()))
        );
    }

    #[test]
    fn test_bare_string_reads_as_file_path() {
        let values = decode_values(r#"{"5":"1699-invoice.png"}"#).unwrap();
        let stored = &values[&FieldId(5)];
        assert_eq!(
            stored.coerce_for(FieldType::File),
            Some(FieldValue::File("1699-invoice.png".into()))
        );
    }

    #[test]
    fn test_mismatched_value_is_rejected() {
        let value = FieldValue::Bool(true);
        assert!(value.coerce_for(FieldType::Text).is_none());
        assert!(FieldValue::File("a".into()).coerce_for(FieldType::Text).is_none());
        assert!(value.coerce_for(FieldType::Checkbox).is_some());
    }
}
