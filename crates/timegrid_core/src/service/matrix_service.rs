//! Matrix use-case service.
//!
//! # Responsibility
//! - Provide the project/reconcile entry points for one registered field.
//! - Decorate a caller's base read/write of root records with the virtual
//!   matrix keys (`read_with`, `write_with`).
//!
//! # Invariants
//! - The base write never sees virtual keys.
//! - Base write, cell-range maintenance and reconciliation share one store
//!   transaction; any failure rolls all of them back.
//! - Identifier errors are raised before the base read or write runs.

use crate::field::field_id::{is_virtual_key, FieldId, LineKey};
use crate::field::registry::MatrixField;
use crate::model::matrix::MatrixSnapshot;
use crate::model::record::{ExecContext, FieldValues, Record, RecordId};
use crate::repo::record_repo::{RecordStore, StoreError, StoreResult};
use crate::service::error::MatrixResult;
use crate::service::projector::MatrixProjector;
use crate::service::reconciler::{decode_update_set, MatrixReconciler, ReconcileSummary};
use crate::service::relations::{find_cell, load_record};
use crate::service::timeline::{RecordTimeline, Timeline};
use log::info;
use serde_json::Value;
use std::collections::BTreeMap;

/// Root id → field values, as produced by a base read.
pub type RootValues = BTreeMap<RecordId, FieldValues>;

/// Use-case service wrapper for matrix fields.
pub struct MatrixService<S: RecordStore, T: Timeline = RecordTimeline> {
    store: S,
    timeline: T,
}

impl<S: RecordStore> MatrixService<S, RecordTimeline> {
    /// Creates a service reading date ranges from record attributes.
    pub fn with_record_timeline(store: S) -> Self {
        Self::new(store, RecordTimeline)
    }
}

impl<S: RecordStore, T: Timeline> MatrixService<S, T> {
    pub fn new(store: S, timeline: T) -> Self {
        Self { store, timeline }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds one snapshot per root. Never writes.
    pub fn project(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
    ) -> MatrixResult<BTreeMap<RecordId, MatrixSnapshot>> {
        MatrixProjector::new(field, &self.store, &self.timeline).project(ctx, root_ids)
    }

    /// Reconciles a flat update set in its own transaction.
    ///
    /// Non-matrix keys in `values` are skipped, not written to the roots;
    /// use `write_with` to persist them.
    pub fn reconcile(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
        values: &FieldValues,
    ) -> MatrixResult<ReconcileSummary> {
        self.store.in_transaction(|| {
            MatrixReconciler::new(field, &self.store).reconcile(ctx, root_ids, values)
        })
    }

    /// Reads `fields` of every root, answering virtual keys itself.
    ///
    /// `base_read` receives the stored (non-virtual) field names only. Any
    /// requested virtual key it did not return is filled in from lines and
    /// cells; editor bookkeeping keys are omitted from the result.
    pub fn read_with<F>(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
        fields: &[String],
        base_read: F,
    ) -> MatrixResult<RootValues>
    where
        F: FnOnce(&[String]) -> StoreResult<RootValues>,
    {
        let (virtual_fields, stored_fields): (Vec<&String>, Vec<&String>) =
            fields.iter().partition(|name| is_virtual_key(name));

        let mut requested = Vec::with_capacity(virtual_fields.len());
        for name in virtual_fields {
            if let Some(field_id) = FieldId::parse(name)? {
                requested.push((name.clone(), field_id));
            }
        }

        let stored_fields: Vec<String> = stored_fields.into_iter().cloned().collect();
        let mut rows = base_read(&stored_fields)?;
        for root_id in root_ids {
            let values = rows.entry(*root_id).or_default();
            for (name, field_id) in &requested {
                if values.contains_key(name) {
                    continue;
                }
                let value = self.virtual_value(ctx, field, field_id)?;
                values.insert(name.clone(), value);
            }
        }
        Ok(rows)
    }

    /// Reads `fields` of the roots straight from the store.
    pub fn read(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
        fields: &[String],
    ) -> MatrixResult<RootValues> {
        self.read_with(ctx, field, root_ids, fields, |stored_fields| {
            let mut rows = RootValues::new();
            for root_id in root_ids {
                let root = self.find_root(ctx, field, *root_id)?;
                let values = stored_fields
                    .iter()
                    .filter_map(|name| {
                        root.values
                            .get(name)
                            .map(|value| (name.clone(), value.clone()))
                    })
                    .collect();
                rows.insert(*root_id, values);
            }
            Ok(rows)
        })
    }

    /// Writes `values` to the roots through `base_write`, then reconciles the
    /// matrix keys, all in one transaction.
    ///
    /// `base_write` receives `values` without virtual keys. When the write
    /// moves a date-range boundary, cell-range maintenance runs before
    /// reconciliation. Returns the base write result unchanged.
    pub fn write_with<R, F>(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
        values: &FieldValues,
        base_write: F,
    ) -> MatrixResult<R>
    where
        F: FnOnce(&FieldValues) -> StoreResult<R>,
    {
        decode_update_set(values)?;
        let stored_values: FieldValues = values
            .iter()
            .filter(|(key, _)| !is_virtual_key(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let moves_boundaries = field.config.touches_date_boundaries(values.keys());

        self.store.in_transaction(|| {
            let output = base_write(&stored_values)?;
            if moves_boundaries {
                self.timeline
                    .maintain_cells(&self.store, ctx, field, root_ids)?;
            }
            let summary =
                MatrixReconciler::new(field, &self.store).reconcile(ctx, root_ids, values)?;

            info!(
                "event=matrix_write module=service status=ok request_id={} record_type={} roots={} stored_fields={} maintenance={} lines_deleted={}",
                ctx.request_id,
                field.record_type,
                root_ids.len(),
                stored_values.len(),
                moves_boundaries,
                summary.deleted_lines.len()
            );
            Ok(output)
        })
    }

    /// Writes `values` to the roots stored in the record store.
    pub fn write(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
        values: &FieldValues,
    ) -> MatrixResult<()> {
        self.write_with(ctx, field, root_ids, values, |stored_values| {
            for root_id in root_ids {
                if stored_values.is_empty() {
                    // Still reject unknown roots before reconciling.
                    self.find_root(ctx, field, *root_id)?;
                } else {
                    self.store
                        .update(ctx, field.record_type, *root_id, stored_values)?;
                }
            }
            Ok(())
        })
    }

    fn virtual_value(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        field_id: &FieldId,
    ) -> MatrixResult<Value> {
        let config = field.config;
        match field_id {
            FieldId::Cell {
                line: LineKey::Existing(line_id),
                date,
            } => {
                let Some(line) =
                    self.store
                        .find_by_id(ctx, &config.lines().collection, *line_id)?
                else {
                    return Ok(Value::Null);
                };
                match find_cell(&self.store, ctx, config, &line, *date)? {
                    Some(cell_id) => {
                        let cell =
                            load_record(&self.store, ctx, &config.cells().collection, cell_id)?;
                        Ok(cell
                            .values
                            .get(&config.cells().value_property)
                            .cloned()
                            .unwrap_or(Value::Null))
                    }
                    None => Ok(Value::Null),
                }
            }
            FieldId::Resource {
                line: LineKey::Existing(line_id),
                slot,
            } => {
                let line = load_record(&self.store, ctx, &config.lines().collection, *line_id)?;
                Ok(line.reference(slot).map(Value::from).unwrap_or(Value::Null))
            }
            FieldId::Cell { .. } | FieldId::Resource { .. } | FieldId::ResourceList { .. } => {
                Ok(Value::Null)
            }
        }
    }

    fn find_root(
        &self,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_id: RecordId,
    ) -> StoreResult<Record> {
        self.store
            .find_by_id(ctx, field.record_type, root_id)?
            .ok_or_else(|| StoreError::NotFound {
                collection: field.record_type.to_string(),
                id: root_id,
            })
    }
}
