//! Administrator-authored schema: pipelines, stages, and fields

use super::ids::{FieldId, PipelineId, StageId};
use crate::error::{CrmError, CrmResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An ordered workflow template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    pub id: PipelineId,
    pub name: String,
}

/// One step within a pipeline
///
/// Stages are ordered by `rank`, ties broken by id. New stages are appended
/// after the highest existing rank, so the default order is insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: StageId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub rank: i64,
}

/// A typed slot for a value, scoped to one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: FieldId,
    pub stage_id: StageId,
    pub name: String,
    pub field_type: FieldType,
    pub rank: i64,
}

/// The kind of value a field holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free-form string. Older rows call this `textfield`.
    #[serde(alias = "textfield")]
    Text,
    Checkbox,
    /// Opaque path into the blob store
    File,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Checkbox => "checkbox",
            FieldType::File => "file",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "textfield" => Ok(FieldType::Text),
            "checkbox" => Ok(FieldType::Checkbox),
            "file" => Ok(FieldType::File),
            other => Err(CrmError::InvalidInput(format!("unknown field type '{}'", other))),
        }
    }
}

/// Trim an administrator-supplied display name and reject blanks
pub fn normalize_name(name: &str, what: &str) -> CrmResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CrmError::InvalidInput(format!("{} name must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

/// Sort stages into resolver order
pub fn sort_stages(stages: &mut [Stage]) {
    stages.sort_by_key(|s| (s.rank, s.id));
}

/// Sort fields into registry order
pub fn sort_fields(fields: &mut [Field]) {
    fields.sort_by_key(|f| (f.rank, f.id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_accepts_legacy_textfield() {
        let parsed: FieldType = serde_json::from_str("\"textfield\"").unwrap();
        assert_eq!(parsed, FieldType::Text);
        assert_eq!("textfield".parse::<FieldType>().unwrap(), FieldType::Text);
        assert_eq!(serde_json::to_string(&FieldType::Text).unwrap(), "\"text\"");
    }

    #[test]
    fn test_unknown_field_type_rejected() {
        assert!(matches!(
            "date".parse::<FieldType>(),
            Err(CrmError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Sales ", "pipeline").unwrap(), "Sales");
        assert!(normalize_name("   ", "stage").is_err());
    }

    #[test]
    fn test_sort_stages_by_rank_then_id() {
        let stage = |id: i64, rank: i64| Stage {
            id: StageId(id),
            pipeline_id: PipelineId(1),
            name: format!("s{}", id),
            rank,
        };
        let mut stages = vec![stage(3, 1), stage(1, 2), stage(2, 1)];
        sort_stages(&mut stages);
        let ids: Vec<i64> = stages.iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
