//! Write path: reconcile a flat update set with stored lines and cells.
//!
//! # Responsibility
//! - Decode submitted matrix keys and group them by line.
//! - Create new lines, rewrite changed resources, upsert cells.
//! - Delete lines the editor no longer submits.
//!
//! # Invariants
//! - The whole update set is decoded before the first store mutation, so a
//!   malformed key never leaves a partial write behind.
//! - At most one cell exists per (line, date): every cell write looks up the
//!   existing cell before creating one.
//! - Any owned line absent from the update set is deleted together with its
//!   cells.

use crate::field::config::MatrixConfig;
use crate::field::field_id::{is_matrix_key, FieldId, LineKey};
use crate::field::registry::MatrixField;
use crate::model::calendar::iso_date;
use crate::model::record::{ExecContext, FieldValues, Record, RecordId};
use crate::repo::record_repo::RecordStore;
use crate::service::error::{MatrixError, MatrixResult};
use crate::service::relations::{
    cell_ids, find_cell, line_ids, link_owned, load_record, unlink_owned,
};
use chrono::NaiveDate;
use log::{debug, info};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

/// Submitted values of one matrix row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineEdit {
    /// Slot name → entity id.
    pub resources: BTreeMap<String, RecordId>,
    /// Date → raw submitted cell value.
    pub cells: BTreeMap<NaiveDate, Value>,
}

/// Counters of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub created_lines: Vec<RecordId>,
    /// Existing lines whose resources were rewritten.
    pub updated_lines: Vec<RecordId>,
    pub deleted_lines: Vec<RecordId>,
    pub created_cells: usize,
    pub updated_cells: usize,
    pub deleted_cells: usize,
}

impl ReconcileSummary {
    /// True when the pass neither created nor deleted any record.
    pub fn is_structurally_unchanged(&self) -> bool {
        self.created_lines.is_empty()
            && self.deleted_lines.is_empty()
            && self.created_cells == 0
            && self.deleted_cells == 0
    }
}

/// Decodes the matrix keys of an update set, grouped by line.
///
/// Non-matrix keys are skipped; editor bookkeeping keys are ignored.
///
/// # Errors
/// - `FieldId` for any key outside the identifier grammar.
/// - `InvalidResourceValue` when a resource key does not carry an entity id.
pub fn decode_update_set(values: &FieldValues) -> MatrixResult<BTreeMap<LineKey, LineEdit>> {
    let mut edits: BTreeMap<LineKey, LineEdit> = BTreeMap::new();
    for (key, value) in values.iter().filter(|(key, _)| is_matrix_key(key)) {
        match FieldId::parse(key)? {
            None | Some(FieldId::ResourceList { .. }) => {}
            Some(FieldId::Resource { line, slot }) => {
                let entity_id = entity_id(key, value)?;
                edits.entry(line).or_default().resources.insert(slot, entity_id);
            }
            Some(FieldId::Cell { line, date }) => {
                edits
                    .entry(line)
                    .or_default()
                    .cells
                    .insert(date, value.clone());
            }
        }
    }
    Ok(edits)
}

/// Applies flat update sets to the lines and cells of one matrix field.
pub struct MatrixReconciler<'a, S: RecordStore> {
    field: MatrixField<'a>,
    store: &'a S,
}

impl<'a, S: RecordStore> MatrixReconciler<'a, S> {
    pub fn new(field: MatrixField<'a>, store: &'a S) -> Self {
        Self { field, store }
    }

    /// Reconciles every root with the same update set.
    ///
    /// Store failures propagate unchanged; atomicity is the caller's unit of
    /// work (see `RecordStore::in_transaction`).
    ///
    /// # Errors
    /// - `RecordNotFound` for an unknown root or an unknown existing line id.
    pub fn reconcile(
        &self,
        ctx: &ExecContext,
        root_ids: &[RecordId],
        values: &FieldValues,
    ) -> MatrixResult<ReconcileSummary> {
        let started_at = Instant::now();
        let edits = decode_update_set(values)?;

        let mut roots = Vec::with_capacity(root_ids.len());
        for root_id in root_ids {
            roots.push(load_record(self.store, ctx, self.field.record_type, *root_id)?);
        }

        let mut summary = ReconcileSummary::default();
        let mut written_lines = BTreeSet::new();
        for root in &mut roots {
            for (line_key, edit) in &edits {
                let line_id = self.write_line(ctx, root, line_key, edit, &mut summary)?;
                written_lines.insert(line_id);
            }
        }

        for root in &mut roots {
            self.delete_orphans(ctx, root, &written_lines, &mut summary)?;
        }

        info!(
            "event=matrix_reconcile module=service status=ok request_id={} roots={} lines_created={} lines_updated={} lines_deleted={} cells_created={} cells_updated={} cells_deleted={} duration_ms={}",
            ctx.request_id,
            root_ids.len(),
            summary.created_lines.len(),
            summary.updated_lines.len(),
            summary.deleted_lines.len(),
            summary.created_cells,
            summary.updated_cells,
            summary.deleted_cells,
            started_at.elapsed().as_millis()
        );
        Ok(summary)
    }

    fn write_line(
        &self,
        ctx: &ExecContext,
        root: &mut Record,
        line_key: &LineKey,
        edit: &LineEdit,
        summary: &mut ReconcileSummary,
    ) -> MatrixResult<RecordId> {
        let lines = self.config().lines();
        let mut line = match line_key {
            LineKey::New(_) => {
                let mut line_values = resource_values(&edit.resources);
                line_values.insert(lines.inverse.clone(), Value::from(root.id));
                let id = self.store.create(ctx, &lines.collection, &line_values)?;
                link_owned(self.store, ctx, root, &lines.property, id)?;
                debug!(
                    "event=matrix_line_create module=service status=ok request_id={} root={} line_key={} line={}",
                    ctx.request_id, root.id, line_key, id
                );
                summary.created_lines.push(id);
                Record::new(id, lines.collection.clone(), line_values)
            }
            LineKey::Existing(id) => {
                let mut line = load_record(self.store, ctx, &lines.collection, *id)?;
                if resources_changed(&line, &edit.resources) {
                    let changes = resource_values(&edit.resources);
                    self.store.update(ctx, &lines.collection, line.id, &changes)?;
                    line.values.extend(changes);
                    summary.updated_lines.push(line.id);
                }
                line
            }
        };

        for (date, value) in &edit.cells {
            self.write_cell(ctx, &mut line, *date, value, summary)?;
        }
        Ok(line.id)
    }

    fn write_cell(
        &self,
        ctx: &ExecContext,
        line: &mut Record,
        date: NaiveDate,
        value: &Value,
        summary: &mut ReconcileSummary,
    ) -> MatrixResult<()> {
        let cells = self.config().cells();
        let mut cell_values = FieldValues::new();
        cell_values.insert(cells.value_property.clone(), value.clone());

        match find_cell(self.store, ctx, self.config(), line, date)? {
            Some(cell_id) => {
                self.store
                    .update(ctx, &cells.collection, cell_id, &cell_values)?;
                summary.updated_cells += 1;
            }
            None => {
                cell_values.insert(cells.date_property.clone(), Value::from(iso_date(date)));
                cell_values.insert(cells.inverse.clone(), Value::from(line.id));
                let cell_id = self.store.create(ctx, &cells.collection, &cell_values)?;
                link_owned(self.store, ctx, line, &cells.property, cell_id)?;
                summary.created_cells += 1;
            }
        }
        Ok(())
    }

    fn delete_orphans(
        &self,
        ctx: &ExecContext,
        root: &mut Record,
        written_lines: &BTreeSet<RecordId>,
        summary: &mut ReconcileSummary,
    ) -> MatrixResult<()> {
        let config = self.config();
        let removed: Vec<RecordId> = line_ids(self.store, ctx, config, root)?
            .into_iter()
            .filter(|line_id| !written_lines.contains(line_id))
            .collect();
        if removed.is_empty() {
            return Ok(());
        }

        for line_id in &removed {
            let line = load_record(self.store, ctx, &config.lines().collection, *line_id)?;
            let orphan_cells = cell_ids(self.store, ctx, config, &line)?;
            self.store
                .delete(ctx, &config.cells().collection, &orphan_cells)?;
            summary.deleted_cells += orphan_cells.len();
        }
        self.store
            .delete(ctx, &config.lines().collection, &removed)?;
        unlink_owned(self.store, ctx, root, &config.lines().property, &removed)?;

        info!(
            "event=matrix_orphan_cleanup module=service status=ok request_id={} root={} lines_deleted={}",
            ctx.request_id,
            root.id,
            removed.len()
        );
        summary.deleted_lines.extend(removed);
        Ok(())
    }

    fn config(&self) -> &'a MatrixConfig {
        self.field.config
    }
}

/// Whether submitted resources differ from the stored line.
fn resources_changed(line: &Record, resources: &BTreeMap<String, RecordId>) -> bool {
    resources
        .iter()
        .any(|(slot, entity_id)| line.reference(slot) != Some(*entity_id))
}

fn resource_values(resources: &BTreeMap<String, RecordId>) -> FieldValues {
    resources
        .iter()
        .map(|(slot, entity_id)| (slot.clone(), Value::from(*entity_id)))
        .collect()
}

fn entity_id(key: &str, value: &Value) -> MatrixResult<RecordId> {
    let parsed = match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0 && float.abs() < RecordId::MAX as f64)
                .map(|float| float as RecordId)
        }),
        Value::String(text) => text.trim().parse::<RecordId>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| MatrixError::InvalidResourceValue {
        field: key.to_string(),
        value: value.to_string(),
    })
}
