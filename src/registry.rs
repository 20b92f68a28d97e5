//! Field definitions per stage, and rendering of stored values against them

use crate::error::CrmResult;
use crate::model::{Field, FieldId, FieldType, FieldValue, StageId, ValueMap};
use crate::repository::SchemaRepository;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered field lists, fetched once per stage and then served from cache
#[derive(Debug, Default)]
pub struct FieldRegistry {
    cache: HashMap<StageId, Vec<Field>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ordered fields of `stage_id`, fetching them on first use
    pub async fn fields_for<S>(&mut self, schema: &S, stage_id: StageId) -> CrmResult<Vec<Field>>
    where
        S: SchemaRepository + ?Sized,
    {
        if let Some(fields) = self.cache.get(&stage_id) {
            return Ok(fields.clone());
        }
        let fields = schema.list_fields(stage_id).await?;
        tracing::debug!(stage_id = %stage_id, count = fields.len(), "cached stage fields");
        self.cache.insert(stage_id, fields.clone());
        Ok(fields)
    }

    pub fn cached(&self, stage_id: StageId) -> Option<&[Field]> {
        self.cache.get(&stage_id).map(Vec::as_slice)
    }

    /// Look up one cached field of a stage
    pub fn field(&self, stage_id: StageId, field_id: FieldId) -> Option<&Field> {
        self.cache
            .get(&stage_id)?
            .iter()
            .find(|f| f.id == field_id)
    }

    /// Drop every cached list, e.g. after the schema was edited
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

/// A stored value as it should be displayed for its field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RenderedValue {
    /// `None` is shown as "N/A"
    Text(Option<String>),
    /// Never null: a missing checkbox is unchecked
    Checkbox(bool),
    File(Option<String>),
}

impl RenderedValue {
    fn absent(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Text => RenderedValue::Text(None),
            FieldType::Checkbox => RenderedValue::Checkbox(false),
            FieldType::File => RenderedValue::File(None),
        }
    }
}

/// One field ready for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedField {
    pub field: Field,
    pub value: RenderedValue,
}

/// Render `values` against an ordered field list.
///
/// Values whose shape does not match the field type are logged and shown as
/// absent. Values for fields not in `fields` are ignored.
pub fn render_fields(fields: &[Field], values: &ValueMap) -> Vec<RenderedField> {
    fields
        .iter()
        .map(|field| {
            let value = match values.get(&field.id) {
                None => RenderedValue::absent(field.field_type),
                Some(stored) => match stored.coerce_for(field.field_type) {
                    Some(FieldValue::Text(s)) => RenderedValue::Text(Some(s)),
                    Some(FieldValue::Bool(b)) => RenderedValue::Checkbox(b),
                    Some(FieldValue::File(path)) => RenderedValue::File(Some(path)),
                    None => {
                        tracing::warn!(
                            field_id = %field.id,
                            expected = %field.field_type,
                            found = stored.type_name(),
                            "stored value does not match field type"
                        );
                        RenderedValue::absent(field.field_type)
                    }
                },
            };
            RenderedField {
                field: field.clone(),
                value,
            }
        })
        .collect()
}
