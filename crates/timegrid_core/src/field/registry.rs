//! Registry of matrix fields keyed by (record type, field name).

use crate::field::config::{ConfigError, MatrixConfig, MatrixFieldOptions};
use log::info;
use std::collections::BTreeMap;

/// Registry key of one matrix field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MatrixFieldKey {
    pub record_type: String,
    pub field_name: String,
}

/// Borrowed view of one registered matrix field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixField<'r> {
    pub record_type: &'r str,
    pub field_name: &'r str,
    pub config: &'r MatrixConfig,
}

/// In-process registry, filled once at configuration-load time.
///
/// Flat identifiers carry no field name, so a record type may hold at most
/// one matrix field; a second registration on the same type is rejected.
#[derive(Debug, Default)]
pub struct MatrixFieldRegistry {
    entries: BTreeMap<MatrixFieldKey, MatrixConfig>,
    field_by_record_type: BTreeMap<String, String>,
}

impl MatrixFieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves declared options and registers the resulting configuration.
    pub fn register(
        &mut self,
        record_type: &str,
        field_name: &str,
        options: &MatrixFieldOptions,
    ) -> Result<MatrixField<'_>, ConfigError> {
        let config = MatrixConfig::resolve(options)?;
        self.register_config(record_type, field_name, config)
    }

    /// Registers an already resolved configuration.
    pub fn register_config(
        &mut self,
        record_type: &str,
        field_name: &str,
        config: MatrixConfig,
    ) -> Result<MatrixField<'_>, ConfigError> {
        let key = MatrixFieldKey {
            record_type: normalize_name(record_type, "record_type")?,
            field_name: normalize_name(field_name, "field_name")?,
        };
        if self.entries.contains_key(&key) {
            return Err(ConfigError::DuplicateField {
                record_type: key.record_type,
                field_name: key.field_name,
            });
        }
        if let Some(existing) = self.field_by_record_type.get(&key.record_type) {
            return Err(ConfigError::ConflictingField {
                record_type: key.record_type.clone(),
                existing: existing.clone(),
                requested: key.field_name,
            });
        }

        info!(
            "event=matrix_field_register module=field status=ok record_type={} field={} slots={}",
            key.record_type,
            key.field_name,
            config.resource_slots().len()
        );
        self.field_by_record_type
            .insert(key.record_type.clone(), key.field_name.clone());
        self.entries.insert(key.clone(), config);
        self.get(&key.record_type, &key.field_name)
            .ok_or(ConfigError::UnregisteredRecordType(key.record_type))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, record_type: &str, field_name: &str) -> Option<MatrixField<'_>> {
        self.entries
            .get_key_value(&MatrixFieldKey {
                record_type: record_type.trim().to_string(),
                field_name: field_name.trim().to_string(),
            })
            .map(|(key, config)| MatrixField {
                record_type: key.record_type.as_str(),
                field_name: key.field_name.as_str(),
                config,
            })
    }

    /// Returns the matrix field declared on a record type.
    pub fn field_for(&self, record_type: &str) -> Result<MatrixField<'_>, ConfigError> {
        let record_type = record_type.trim();
        self.field_by_record_type
            .get(record_type)
            .and_then(|field_name| self.get(record_type, field_name))
            .ok_or_else(|| ConfigError::UnregisteredRecordType(record_type.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &MatrixFieldKey> {
        self.entries.keys()
    }
}

fn normalize_name(value: &str, option: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingOption(option));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::MatrixFieldRegistry;
    use crate::field::config::{ConfigError, MatrixFieldOptions};
    use serde_json::json;

    fn options() -> MatrixFieldOptions {
        MatrixFieldOptions {
            line_property: Some("line_ids".to_string()),
            line_type: Some("report.line".to_string()),
            line_inverse_property: Some("report_id".to_string()),
            line_resource_property_list: Some(json!([["supplier", "res.partner"]])),
            cell_property: Some("cell_ids".to_string()),
            cell_type: Some("report.cell".to_string()),
            cell_value_property: Some("quantity".to_string()),
            ..MatrixFieldOptions::default()
        }
    }

    #[test]
    fn registers_and_resolves_by_record_type() {
        let mut registry = MatrixFieldRegistry::new();
        registry
            .register("report", "matrix", &options())
            .expect("first registration");

        assert_eq!(registry.len(), 1);
        let field = registry.field_for("report").expect("registered field");
        assert_eq!(field.field_name, "matrix");
        assert_eq!(field.config.lines().collection, "report.line");
        assert!(registry.get("report", "matrix").is_some());
    }

    #[test]
    fn rejects_duplicate_registration() {
        let mut registry = MatrixFieldRegistry::new();
        registry.register("report", "matrix", &options()).unwrap();
        let err = registry
            .register("report", "matrix", &options())
            .expect_err("duplicate must fail");
        assert!(matches!(err, ConfigError::DuplicateField { .. }));
    }

    #[test]
    fn rejects_second_matrix_field_on_same_record_type() {
        let mut registry = MatrixFieldRegistry::new();
        registry.register("report", "matrix", &options()).unwrap();
        let err = registry
            .register("report", "other_matrix", &options())
            .expect_err("conflict must fail");
        assert_eq!(
            err,
            ConfigError::ConflictingField {
                record_type: "report".to_string(),
                existing: "matrix".to_string(),
                requested: "other_matrix".to_string(),
            }
        );
        registry
            .register("forecast", "matrix", &options())
            .expect("other record types are independent");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_options_never_register() {
        let mut registry = MatrixFieldRegistry::new();
        let mut bad = options();
        bad.cell_type = None;
        assert!(registry.register("report", "matrix", &bad).is_err());
        assert!(registry.is_empty());
        assert!(matches!(
            registry.field_for("report").unwrap_err(),
            ConfigError::UnregisteredRecordType(_)
        ));
    }
}
