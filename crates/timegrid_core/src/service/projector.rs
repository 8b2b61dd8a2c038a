//! Read path: project roots, lines and cells into matrix snapshots.
//!
//! # Responsibility
//! - Build one `MatrixSnapshot` per requested root.
//! - Synthesize the template row the editor clones for new lines.
//!
//! # Invariants
//! - Read-only: never calls a store mutation.
//! - Rows follow line storage order; the template row is always last.
//! - Resource columns follow slot declaration order.

use crate::field::config::MatrixConfig;
use crate::field::registry::MatrixField;
use crate::model::calendar::compact_date;
use crate::model::matrix::{MatrixRow, MatrixSnapshot, ResourceCatalog, RowId, RowResource};
use crate::model::record::{ExecContext, Record, RecordId};
use crate::repo::record_repo::RecordStore;
use crate::service::error::{MatrixError, MatrixResult};
use crate::service::relations::{cell_date, cell_ids, date_range_source, line_ids, load_record};
use crate::service::timeline::Timeline;
use chrono::NaiveDate;
use log::info;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Value of every active template cell.
pub const TEMPLATE_CELL_VALUE: f64 = 0.0;
pub const TEMPLATE_ROW_NAME: &str = "Row template";

/// Builds matrix snapshots for one registered matrix field.
pub struct MatrixProjector<'a, S: RecordStore, T: Timeline> {
    field: MatrixField<'a>,
    store: &'a S,
    timeline: &'a T,
}

impl<'a, S: RecordStore, T: Timeline> MatrixProjector<'a, S, T> {
    pub fn new(field: MatrixField<'a>, store: &'a S, timeline: &'a T) -> Self {
        Self {
            field,
            store,
            timeline,
        }
    }

    /// Projects every root into its snapshot, keyed by root id.
    pub fn project(
        &self,
        ctx: &ExecContext,
        root_ids: &[RecordId],
    ) -> MatrixResult<BTreeMap<RecordId, MatrixSnapshot>> {
        let started_at = Instant::now();
        let catalogs = self.resource_catalogs(ctx)?;

        let mut snapshots = BTreeMap::new();
        for root_id in root_ids {
            let root = load_record(self.store, ctx, self.field.record_type, *root_id)?;
            let snapshot = self.project_root(ctx, &root, &catalogs)?;
            snapshots.insert(root.id, snapshot);
        }

        info!(
            "event=matrix_project module=service status=ok request_id={} record_type={} roots={} duration_ms={}",
            ctx.request_id,
            self.field.record_type,
            snapshots.len(),
            started_at.elapsed().as_millis()
        );
        Ok(snapshots)
    }

    fn project_root(
        &self,
        ctx: &ExecContext,
        root: &Record,
        catalogs: &[ResourceCatalog],
    ) -> MatrixResult<MatrixSnapshot> {
        let config = self.config();
        let source = date_range_source(self.store, ctx, config, root)?;
        let date_range = self.timeline.date_range(&source)?;
        let active_range = match config.active_date_range_property() {
            Some(property) => self
                .timeline
                .active_date_range(&source, property)?
                .filter(|dates| !dates.is_empty())
                .unwrap_or_else(|| date_range.clone()),
            None => date_range.clone(),
        };

        let mut rows = Vec::new();
        for line_id in line_ids(self.store, ctx, config, root)? {
            let line = load_record(self.store, ctx, &config.lines().collection, line_id)?;
            rows.push(self.line_row(ctx, &line, catalogs)?);
        }
        rows.push(template_row(config, &active_range));

        Ok(MatrixSnapshot {
            matrix_data: rows,
            date_range: date_range.into_iter().map(compact_date).collect(),
            resource_value_list: catalogs.to_vec(),
            column_date_label_format: config.date_format().map(str::to_string),
            class: config.style_classes(),
        })
    }

    /// Full selection catalog of every slot, unfiltered.
    fn resource_catalogs(&self, ctx: &ExecContext) -> MatrixResult<Vec<ResourceCatalog>> {
        let mut catalogs = Vec::new();
        for slot in self.config().resource_slots() {
            let mut values = Vec::new();
            for entity_id in self.store.search(ctx, &slot.collection, &[], None)? {
                let entity = load_record(self.store, ctx, &slot.collection, entity_id)?;
                values.push((entity.id, entity.display_label()));
            }
            catalogs.push(ResourceCatalog {
                id: slot.name.clone(),
                values,
            });
        }
        Ok(catalogs)
    }

    fn line_row(
        &self,
        ctx: &ExecContext,
        line: &Record,
        catalogs: &[ResourceCatalog],
    ) -> MatrixResult<MatrixRow> {
        let config = self.config();

        let widget = config
            .dynamic_widget_property()
            .and_then(|property| line.text(property))
            .unwrap_or(config.default_widget())
            .to_string();

        let mut resources = Vec::with_capacity(catalogs.len());
        for (slot, catalog) in config.resource_slots().iter().zip(catalogs) {
            let entity_id =
                line.reference(&slot.name)
                    .ok_or_else(|| MatrixError::MissingProperty {
                        collection: line.collection.clone(),
                        id: line.id,
                        property: slot.name.clone(),
                    })?;
            let label = catalog
                .label_of(entity_id)
                .ok_or_else(|| MatrixError::RecordNotFound {
                    collection: slot.collection.clone(),
                    id: entity_id,
                })?;
            resources.push(RowResource {
                id: slot.name.clone(),
                label: label.to_string(),
                value: entity_id,
            });
        }

        let cells = config.cells();
        let mut cells_data = BTreeMap::new();
        for cell_id in cell_ids(self.store, ctx, config, line)? {
            let cell = load_record(self.store, ctx, &cells.collection, cell_id)?;
            let value = cell
                .values
                .get(&cells.value_property)
                .cloned()
                .unwrap_or(Value::Null);
            cells_data.insert(compact_date(cell_date(config, &cell)?), value);
        }

        Ok(MatrixRow {
            id: RowId::Line(line.id),
            name: line.display_label(),
            widget,
            resources,
            cells_data,
        })
    }

    fn config(&self) -> &'a MatrixConfig {
        self.field.config
    }
}

/// Synthetic row used by the editor to add lines; never written back.
fn template_row(config: &MatrixConfig, active_range: &[NaiveDate]) -> MatrixRow {
    MatrixRow {
        id: RowId::Template,
        name: TEMPLATE_ROW_NAME.to_string(),
        widget: config.default_widget().to_string(),
        resources: config
            .resource_slots()
            .iter()
            .map(|slot| RowResource {
                id: slot.name.clone(),
                label: humanize_slot_name(&slot.name),
                value: 0,
            })
            .collect(),
        cells_data: active_range
            .iter()
            .map(|date| (compact_date(*date), Value::from(TEMPLATE_CELL_VALUE)))
            .collect(),
    }
}

/// `cost_center_id` → `Cost Center Id`.
pub fn humanize_slot_name(slot: &str) -> String {
    let mut label = String::with_capacity(slot.len());
    let mut word_start = true;
    for c in slot.replace('_', " ").chars() {
        if c.is_alphabetic() {
            if word_start {
                label.extend(c.to_uppercase());
            } else {
                label.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            label.push(c);
            word_start = true;
        }
    }
    label
}
