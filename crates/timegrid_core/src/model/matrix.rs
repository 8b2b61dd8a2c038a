//! Matrix snapshot payload handed to the grid editor.
//!
//! Field names follow the editor's wire contract (`matrix_data`,
//! `cells_data`, `resource_value_list`, ...), so the structs serialize
//! directly with serde.

use crate::field::field_id::{FieldId, LineKey, TEMPLATE_ROW_ID};
use crate::model::calendar::parse_compact_date;
use crate::model::record::{FieldValues, RecordId};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Row identity: a stored line, or the synthetic template row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowId {
    Line(RecordId),
    Template,
}

impl Serialize for RowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Line(id) => serializer.serialize_i64(*id),
            Self::Template => serializer.serialize_str(TEMPLATE_ROW_ID),
        }
    }
}

/// Resource column value of one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowResource {
    /// Slot name.
    pub id: String,
    pub label: String,
    /// Referenced entity id; `0` on the template row.
    pub value: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRow {
    pub id: RowId,
    pub name: String,
    pub widget: String,
    pub resources: Vec<RowResource>,
    /// `YYYYMMDD` → cell value.
    pub cells_data: BTreeMap<String, Value>,
}

/// Selection catalog of one resource slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceCatalog {
    /// Slot name.
    pub id: String,
    /// `(entity id, label)` pairs, serialized as two-element arrays.
    pub values: Vec<(RecordId, String)>,
}

impl ResourceCatalog {
    pub fn label_of(&self, entity_id: RecordId) -> Option<&str> {
        self.values
            .iter()
            .find(|(id, _)| *id == entity_id)
            .map(|(_, label)| label.as_str())
    }
}

/// Everything the editor needs to render one root's matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixSnapshot {
    /// Line rows in storage order, then exactly one template row.
    pub matrix_data: Vec<MatrixRow>,
    /// `YYYYMMDD` column keys.
    pub date_range: Vec<String>,
    pub resource_value_list: Vec<ResourceCatalog>,
    pub column_date_label_format: Option<String>,
    pub class: Vec<String>,
}

impl MatrixSnapshot {
    /// Stored line rows, template excluded.
    pub fn line_rows(&self) -> impl Iterator<Item = &MatrixRow> {
        self.matrix_data
            .iter()
            .filter(|row| matches!(row.id, RowId::Line(_)))
    }

    pub fn template_row(&self) -> Option<&MatrixRow> {
        self.matrix_data
            .iter()
            .find(|row| row.id == RowId::Template)
    }

    pub fn row(&self, line_id: RecordId) -> Option<&MatrixRow> {
        self.matrix_data
            .iter()
            .find(|row| row.id == RowId::Line(line_id))
    }

    /// Flat field values an editor submits when saving this snapshot
    /// unchanged: one resource key per slot and one cell key per stored cell
    /// of every line row.
    pub fn flat_fields(&self) -> FieldValues {
        let mut fields = FieldValues::new();
        for row in self.line_rows() {
            let RowId::Line(line_id) = row.id else {
                continue;
            };
            let line = LineKey::Existing(line_id);
            for resource in &row.resources {
                fields.insert(
                    FieldId::resource(line.clone(), resource.id.as_str()).to_string(),
                    Value::from(resource.value),
                );
            }
            for (column, value) in &row.cells_data {
                if let Some(date) = parse_compact_date(column) {
                    fields.insert(FieldId::cell(line.clone(), date).to_string(), value.clone());
                }
            }
        }
        fields
    }
}
