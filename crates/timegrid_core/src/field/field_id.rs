//! Flat field identifiers exchanged with the grid editor.
//!
//! Every editable matrix cell travels as one flat key:
//!
//! - `res_<line>_<slot>`: resource slot value of a line.
//! - `cell_<line>_<YYYYMMDD>`: line value at one date.
//! - `resource_list_<slot>`: selection catalog of a slot (read-only).
//!
//! `<line>` is an existing line id in canonical decimal form, or `new`
//! followed by an optional canonical decimal suffix for rows the editor has
//! not saved yet. `cell_template_*`, `res_template_*`, `res_dummy*` and
//! `resource_list_*` are produced by the editor for its own bookkeeping and
//! decode to "ignored".
//!
//! # Invariants
//! - `FieldId::parse(&id.to_string())` returns `id` for resource and cell
//!   addresses.
//! - A cell key with a bad date segment is malformed, never ignored.

use crate::model::calendar::{compact_date, parse_compact_date};
use crate::model::record::RecordId;
use chrono::NaiveDate;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const SEPARATOR: char = '_';
pub const RESOURCE_PREFIX: &str = "res_";
pub const CELL_PREFIX: &str = "cell_";
pub const RESOURCE_LIST_PREFIX: &str = "resource_list_";
pub const NEW_LINE_PREFIX: &str = "new";
pub const TEMPLATE_ROW_ID: &str = "template";

/// Row part of a flat identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LineKey {
    /// Persisted line.
    Existing(RecordId),
    /// Editor-side row not yet stored; holds the suffix after `new`.
    New(String),
}

impl LineKey {
    /// Parses the line segment of an identifier.
    ///
    /// Existing ids must round-trip through integer formatting, so `007`,
    /// `+7`, `-7` and `7a` are all rejected. The suffix of a `new` key
    /// follows the same rule, or is empty.
    pub fn parse(segment: &str) -> Option<Self> {
        if let Some(suffix) = segment.strip_prefix(NEW_LINE_PREFIX) {
            return (suffix.is_empty() || canonical_id(suffix).is_some())
                .then(|| Self::New(suffix.to_string()));
        }
        canonical_id(segment).map(Self::Existing)
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }

    pub fn existing_id(&self) -> Option<RecordId> {
        match self {
            Self::Existing(id) => Some(*id),
            Self::New(_) => None,
        }
    }
}

fn canonical_id(segment: &str) -> Option<RecordId> {
    if segment.is_empty() || !segment.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let id = segment.parse::<RecordId>().ok()?;
    (id.to_string() == segment).then_some(id)
}

impl Display for LineKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existing(id) => write!(f, "{id}"),
            Self::New(suffix) => write!(f, "{NEW_LINE_PREFIX}{suffix}"),
        }
    }
}

/// Structured address of one flat identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldId {
    Resource { line: LineKey, slot: String },
    Cell { line: LineKey, date: NaiveDate },
    /// Composed for snapshots only; `parse` reports it as ignored.
    ResourceList { slot: String },
}

impl FieldId {
    /// Decodes one submitted identifier.
    ///
    /// Returns `Ok(None)` for editor bookkeeping identifiers that must be
    /// skipped, `Ok(Some(_))` for writable addresses.
    ///
    /// # Errors
    /// - `MalformedDate` when a three-segment cell key has a bad date.
    /// - `ConventionViolation` for anything else outside the grammar.
    pub fn parse(raw: &str) -> Result<Option<Self>, FieldIdError> {
        let segments: Vec<&str> = raw.split(SEPARATOR).collect();
        if is_reserved(raw, segments.len()) {
            return Ok(None);
        }

        match segments.as_slice() {
            ["cell", line, date] => {
                let date = parse_compact_date(date).ok_or_else(|| FieldIdError::MalformedDate {
                    field: raw.to_string(),
                    date: (*date).to_string(),
                })?;
                let line = parse_line(raw, line)?;
                Ok(Some(Self::Cell { line, date }))
            }
            ["res", line, slot @ ..] if !slot.is_empty() => {
                // Slot names may contain the separator themselves.
                let slot = slot.join("_");
                if slot.is_empty() {
                    return Err(FieldIdError::ConventionViolation(raw.to_string()));
                }
                let line = parse_line(raw, line)?;
                Ok(Some(Self::Resource { line, slot }))
            }
            _ => Err(FieldIdError::ConventionViolation(raw.to_string())),
        }
    }

    pub fn resource(line: LineKey, slot: impl Into<String>) -> Self {
        Self::Resource {
            line,
            slot: slot.into(),
        }
    }

    pub fn cell(line: LineKey, date: NaiveDate) -> Self {
        Self::Cell { line, date }
    }

    pub fn resource_list(slot: impl Into<String>) -> Self {
        Self::ResourceList { slot: slot.into() }
    }

    pub fn line(&self) -> Option<&LineKey> {
        match self {
            Self::Resource { line, .. } | Self::Cell { line, .. } => Some(line),
            Self::ResourceList { .. } => None,
        }
    }
}

impl Display for FieldId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resource { line, slot } => write!(f, "{RESOURCE_PREFIX}{line}_{slot}"),
            Self::Cell { line, date } => {
                write!(f, "{CELL_PREFIX}{line}_{}", compact_date(*date))
            }
            Self::ResourceList { slot } => write!(f, "{RESOURCE_LIST_PREFIX}{slot}"),
        }
    }
}

/// Whether a submitted key belongs to the matrix write path at all.
pub fn is_matrix_key(key: &str) -> bool {
    key.starts_with(RESOURCE_PREFIX) || key.starts_with(CELL_PREFIX)
}

/// Whether a key is virtual, i.e. never a stored column of the root record.
pub fn is_virtual_key(key: &str) -> bool {
    is_matrix_key(key) || key.starts_with(RESOURCE_LIST_PREFIX)
}

fn is_reserved(raw: &str, segment_count: usize) -> bool {
    (raw.starts_with("cell_template_") && segment_count == 3)
        || (raw.starts_with("res_template_") && segment_count > 2)
        || (raw.starts_with("res_dummy") && segment_count > 2)
        || (raw.starts_with(RESOURCE_LIST_PREFIX) && segment_count > 2)
}

fn parse_line(raw: &str, segment: &str) -> Result<LineKey, FieldIdError> {
    LineKey::parse(segment).ok_or_else(|| FieldIdError::ConventionViolation(raw.to_string()))
}

/// Grammar violations in a submitted identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIdError {
    MalformedDate { field: String, date: String },
    ConventionViolation(String),
}

impl Display for FieldIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedDate { field, date } => {
                write!(f, "field `{field}` has an invalid date element `{date}`")
            }
            Self::ConventionViolation(field) => {
                write!(f, "field `{field}` does not respect matrix field conventions")
            }
        }
    }
}

impl Error for FieldIdError {}
