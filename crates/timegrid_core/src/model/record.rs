//! Generic record model exchanged with record stores.
//!
//! # Responsibility
//! - Carry one stored entity (root, line, cell or resource) as a JSON
//!   attribute map keyed by property name.
//! - Provide the lookups the matrix services need: references, text
//!   attributes and display labels.
//!
//! # Invariants
//! - `id` is assigned by the store and never reused inside one collection.
//! - `values` never contains the `id` key; identity lives in `id` only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Store-assigned record identifier.
pub type RecordId = i64;

/// Attribute map of a record, or a flat set of submitted field values.
pub type FieldValues = Map<String, Value>;

/// One stored entity of a named collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    /// Collection the record belongs to, e.g. `activity.report.line`.
    pub collection: String,
    pub values: FieldValues,
}

impl Record {
    pub fn new(id: RecordId, collection: impl Into<String>, values: FieldValues) -> Self {
        Self {
            id,
            collection: collection.into(),
            values,
        }
    }

    /// Returns the attribute when it carries a meaningful value.
    ///
    /// `null`, `false` and the empty string are treated as "not set", which is
    /// how relational stores report empty optional columns.
    pub fn attr(&self, property: &str) -> Option<&Value> {
        self.values.get(property).filter(|value| is_set(value))
    }

    /// Reads a many-to-one style reference stored as an integer id.
    pub fn reference(&self, property: &str) -> Option<RecordId> {
        self.attr(property).and_then(Value::as_i64)
    }

    /// Reads a non-empty text attribute.
    pub fn text(&self, property: &str) -> Option<&str> {
        self.attr(property)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Human-facing label: `name`, else `title`, else a generated placeholder.
    pub fn display_label(&self) -> String {
        ["name", "title"]
            .iter()
            .find_map(|property| self.attr(property).map(label_text))
            .unwrap_or_else(|| format!("Untitled (ID: {})", self.id))
    }
}

/// Opaque execution context forwarded to every store call.
///
/// The matrix services never interpret it beyond log correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    /// Acting user, when the embedding application has one.
    pub user_id: Option<i64>,
    /// Correlates the log events of one read or write pass.
    pub request_id: Uuid,
}

impl ExecContext {
    /// Anonymous context with a fresh request id.
    pub fn new() -> Self {
        Self {
            user_id: None,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new()
        }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn label_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
