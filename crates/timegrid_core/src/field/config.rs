//! Matrix field options and their validated configuration.
//!
//! # Responsibility
//! - Deserialize declared matrix field options.
//! - Resolve them once into an immutable `MatrixConfig`.
//!
//! # Invariants
//! - A `MatrixConfig` can only be built through `MatrixConfig::resolve`.
//! - Every required option is present and non-blank.
//! - The resource slot list holds at least one `[slot, collection]` pair and
//!   slot names are unique.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_WIDGET_TYPE: &str = "float";
pub const DEFAULT_CELL_INVERSE_PROPERTY: &str = "line_id";
pub const DEFAULT_CELL_DATE_PROPERTY: &str = "date";
pub const DEFAULT_DATE_BOUNDARY_PROPERTIES: &[&str] = &["start_date", "end_date"];
/// Style tag appended when the experimental slider is enabled.
pub const SLIDER_CLASS: &str = "slider";

static PROPERTY_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid property name regex"));
static COLLECTION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid collection name regex")
});

/// Declared options of one matrix field, as written by the embedding app.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixFieldOptions {
    /// Root property holding the line id list, e.g. `line_ids`. Roots that do
    /// not carry it own the lines pointing back through
    /// `line_inverse_property`.
    pub line_property: Option<String>,
    /// Collection holding the lines.
    pub line_type: Option<String>,
    /// Line property pointing back to the root.
    pub line_inverse_property: Option<String>,
    /// Ordered `[[slot, collection], ...]` pairs.
    pub line_resource_property_list: Option<Value>,
    /// Line property holding the cell id list, e.g. `cell_ids`. Same fallback
    /// as `line_property`, through `cell_inverse_property`.
    pub cell_property: Option<String>,
    pub cell_type: Option<String>,
    pub cell_value_property: Option<String>,
    /// Defaults to `line_id`.
    pub cell_inverse_property: Option<String>,
    /// Defaults to `date`.
    pub cell_date_property: Option<String>,
    /// Root property referencing the record that owns the date range.
    pub date_range_property: Option<String>,
    /// Collection of the record referenced by `date_range_property`.
    pub date_range_type: Option<String>,
    pub active_date_range_property: Option<String>,
    pub date_format: Option<String>,
    pub default_widget_type: Option<String>,
    pub dynamic_widget_type_property: Option<String>,
    #[serde(default)]
    pub css_class: Vec<String>,
    #[serde(default)]
    pub experimental_slider: bool,
    /// Root properties whose change triggers cell-range maintenance.
    pub date_boundary_properties: Option<Vec<String>>,
}

impl MatrixFieldOptions {
    /// Parses options from a JSON object.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

/// Lines owned by the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRelation {
    pub property: String,
    pub collection: String,
    pub inverse: String,
}

/// Cells owned by one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRelation {
    pub property: String,
    pub collection: String,
    pub inverse: String,
    pub date_property: String,
    pub value_property: String,
}

/// One fixed resource column of the matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSlot {
    /// Line property holding the entity id; also the slot name in field ids.
    pub name: String,
    pub collection: String,
}

/// Related record that carries the date range instead of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeSource {
    pub property: String,
    pub collection: String,
}

/// Validated, read-only matrix field configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    lines: LineRelation,
    cells: CellRelation,
    resource_slots: Vec<ResourceSlot>,
    default_widget: String,
    dynamic_widget_property: Option<String>,
    date_range_source: Option<DateRangeSource>,
    active_date_range_property: Option<String>,
    date_format: Option<String>,
    css_class: Vec<String>,
    experimental_slider: bool,
    date_boundary_properties: Vec<String>,
}

impl MatrixConfig {
    /// Validates declared options into a configuration.
    ///
    /// # Errors
    /// - `MissingOption` when a required option is absent or blank.
    /// - `InvalidOption` when an option has the wrong shape.
    pub fn resolve(options: &MatrixFieldOptions) -> Result<Self, ConfigError> {
        let lines = LineRelation {
            property: required_property(&options.line_property, "line_property")?,
            collection: required_collection(&options.line_type, "line_type")?,
            inverse: required_property(&options.line_inverse_property, "line_inverse_property")?,
        };
        let resource_slots = resolve_resource_slots(options.line_resource_property_list.as_ref())?;
        let cells = CellRelation {
            property: required_property(&options.cell_property, "cell_property")?,
            collection: required_collection(&options.cell_type, "cell_type")?,
            inverse: optional_property(&options.cell_inverse_property, "cell_inverse_property")?
                .unwrap_or_else(|| DEFAULT_CELL_INVERSE_PROPERTY.to_string()),
            date_property: optional_property(&options.cell_date_property, "cell_date_property")?
                .unwrap_or_else(|| DEFAULT_CELL_DATE_PROPERTY.to_string()),
            value_property: required_property(
                &options.cell_value_property,
                "cell_value_property",
            )?,
        };

        let date_range_source =
            match optional_property(&options.date_range_property, "date_range_property")? {
                Some(property) => Some(DateRangeSource {
                    property,
                    collection: required_collection(&options.date_range_type, "date_range_type")?,
                }),
                None => None,
            };

        let date_boundary_properties = match &options.date_boundary_properties {
            Some(properties) => properties
                .iter()
                .map(|property| checked_property(property, "date_boundary_properties"))
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_DATE_BOUNDARY_PROPERTIES
                .iter()
                .map(|property| (*property).to_string())
                .collect(),
        };

        Ok(Self {
            lines,
            cells,
            resource_slots,
            default_widget: non_blank(&options.default_widget_type)
                .unwrap_or(DEFAULT_WIDGET_TYPE)
                .to_string(),
            dynamic_widget_property: optional_property(
                &options.dynamic_widget_type_property,
                "dynamic_widget_type_property",
            )?,
            date_range_source,
            active_date_range_property: optional_property(
                &options.active_date_range_property,
                "active_date_range_property",
            )?,
            date_format: non_blank(&options.date_format).map(str::to_string),
            css_class: options
                .css_class
                .iter()
                .map(|class| class.trim())
                .filter(|class| !class.is_empty())
                .map(str::to_string)
                .collect(),
            experimental_slider: options.experimental_slider,
            date_boundary_properties,
        })
    }

    pub fn lines(&self) -> &LineRelation {
        &self.lines
    }

    pub fn cells(&self) -> &CellRelation {
        &self.cells
    }

    pub fn resource_slots(&self) -> &[ResourceSlot] {
        &self.resource_slots
    }

    pub fn default_widget(&self) -> &str {
        &self.default_widget
    }

    pub fn dynamic_widget_property(&self) -> Option<&str> {
        self.dynamic_widget_property.as_deref()
    }

    pub fn date_range_source(&self) -> Option<&DateRangeSource> {
        self.date_range_source.as_ref()
    }

    pub fn active_date_range_property(&self) -> Option<&str> {
        self.active_date_range_property.as_deref()
    }

    pub fn date_format(&self) -> Option<&str> {
        self.date_format.as_deref()
    }

    /// Style tags emitted with every snapshot.
    pub fn style_classes(&self) -> Vec<String> {
        let mut classes = self.css_class.clone();
        if self.experimental_slider {
            classes.push(SLIDER_CLASS.to_string());
        }
        classes
    }

    /// Whether a write touching `keys` moves the date-range boundaries.
    pub fn touches_date_boundaries<'k>(&self, mut keys: impl Iterator<Item = &'k String>) -> bool {
        keys.any(|key| self.date_boundary_properties.iter().any(|p| p == key))
    }
}

fn resolve_resource_slots(raw: Option<&Value>) -> Result<Vec<ResourceSlot>, ConfigError> {
    const OPTION: &str = "line_resource_property_list";
    let items = match raw {
        None | Some(Value::Null) => return Err(ConfigError::MissingOption(OPTION)),
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(_) => {
            return Err(ConfigError::InvalidOption {
                option: OPTION,
                message: "must be a list with at least one [slot, collection] pair".to_string(),
            })
        }
    };

    let mut seen = BTreeSet::new();
    let mut slots = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let pair = match item.as_array().map(Vec::as_slice) {
            Some([Value::String(name), Value::String(collection)]) => (name, collection),
            _ => {
                return Err(ConfigError::InvalidOption {
                    option: OPTION,
                    message: format!("entry {index} must be a [slot, collection] pair of strings"),
                })
            }
        };
        let name = checked_property(pair.0, OPTION)?;
        let collection = checked_collection(pair.1, OPTION)?;
        if !seen.insert(name.clone()) {
            return Err(ConfigError::InvalidOption {
                option: OPTION,
                message: format!("slot `{name}` is declared twice"),
            });
        }
        slots.push(ResourceSlot { name, collection });
    }
    Ok(slots)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required_property(value: &Option<String>, option: &'static str) -> Result<String, ConfigError> {
    optional_property(value, option)?.ok_or(ConfigError::MissingOption(option))
}

fn optional_property(
    value: &Option<String>,
    option: &'static str,
) -> Result<Option<String>, ConfigError> {
    non_blank(value)
        .map(|value| checked_property(value, option))
        .transpose()
}

fn required_collection(
    value: &Option<String>,
    option: &'static str,
) -> Result<String, ConfigError> {
    let value = non_blank(value).ok_or(ConfigError::MissingOption(option))?;
    checked_collection(value, option)
}

fn checked_property(value: &str, option: &'static str) -> Result<String, ConfigError> {
    let value = value.trim();
    if !PROPERTY_NAME_RE.is_match(value) {
        return Err(ConfigError::InvalidOption {
            option,
            message: format!("`{value}` is not a valid property name"),
        });
    }
    Ok(value.to_string())
}

fn checked_collection(value: &str, option: &'static str) -> Result<String, ConfigError> {
    let value = value.trim();
    if !COLLECTION_NAME_RE.is_match(value) {
        return Err(ConfigError::InvalidOption {
            option,
            message: format!("`{value}` is not a valid collection name"),
        });
    }
    Ok(value.to_string())
}

/// Configuration and registration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Options could not be decoded at all.
    Parse(String),
    MissingOption(&'static str),
    InvalidOption {
        option: &'static str,
        message: String,
    },
    /// Same (record type, field name) registered twice.
    DuplicateField {
        record_type: String,
        field_name: String,
    },
    /// A record type already carries another matrix field.
    ConflictingField {
        record_type: String,
        existing: String,
        requested: String,
    },
    /// No matrix field is registered for the record type.
    UnregisteredRecordType(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(message) => write!(f, "matrix field options are not valid JSON: {message}"),
            Self::MissingOption(option) => write!(f, "matrix option `{option}` is missing"),
            Self::InvalidOption { option, message } => {
                write!(f, "matrix option `{option}` is invalid: {message}")
            }
            Self::DuplicateField {
                record_type,
                field_name,
            } => write!(
                f,
                "matrix field `{field_name}` is already registered on `{record_type}`"
            ),
            Self::ConflictingField {
                record_type,
                existing,
                requested,
            } => write!(
                f,
                "`{record_type}` already has matrix field `{existing}`; cannot add `{requested}`"
            ),
            Self::UnregisteredRecordType(record_type) => {
                write!(f, "no matrix field registered on `{record_type}`")
            }
        }
    }
}

impl Error for ConfigError {}
