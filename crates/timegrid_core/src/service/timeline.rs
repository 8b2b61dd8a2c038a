//! Date axis of an aggregate root.
//!
//! # Responsibility
//! - Read the ordered date range and the active date range of the record
//!   owning the timeline.
//! - Keep stored cells inside the range when its boundaries move.
//!
//! # Invariants
//! - A date range is strictly ascending.
//! - An unset active range means "every date is active".

use crate::field::registry::MatrixField;
use crate::model::calendar::{daily_range, parse_iso_date};
use crate::model::record::{ExecContext, Record, RecordId};
use crate::repo::record_repo::RecordStore;
use crate::service::error::{MatrixError, MatrixResult};
use crate::service::relations::{
    cell_date, cell_ids, date_range_source, line_ids, load_record, unlink_owned,
};
use chrono::NaiveDate;
use log::info;
use serde_json::Value;
use std::collections::BTreeSet;

/// Explicit list of `YYYY-MM-DD` dates, when the record carries one.
pub const DATE_RANGE_PROPERTY: &str = "date_range";
pub const START_DATE_PROPERTY: &str = "start_date";
pub const END_DATE_PROPERTY: &str = "end_date";

/// Aggregate-root collaborator exposing the matrix date axis.
pub trait Timeline {
    /// Ordered dates forming the matrix columns.
    fn date_range(&self, source: &Record) -> MatrixResult<Vec<NaiveDate>>;

    /// Dates open for input. `Ok(None)` when the property is unset.
    fn active_date_range(
        &self,
        source: &Record,
        property: &str,
    ) -> MatrixResult<Option<Vec<NaiveDate>>>;

    /// Invoked before matrix keys are written when a write moves the
    /// date-range boundaries.
    fn maintain_cells<S: RecordStore>(
        &self,
        store: &S,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
    ) -> MatrixResult<()>;
}

/// Timeline read from record attributes.
///
/// Uses the `date_range` list when present, otherwise every day from
/// `start_date` to `end_date`. Maintenance deletes cells dated outside the
/// current range.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordTimeline;

impl Timeline for RecordTimeline {
    fn date_range(&self, source: &Record) -> MatrixResult<Vec<NaiveDate>> {
        let invalid = |message: String| MatrixError::InvalidDateRange {
            collection: source.collection.clone(),
            id: source.id,
            message,
        };

        let dates = match source.values.get(DATE_RANGE_PROPERTY) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .and_then(parse_iso_date)
                        .ok_or_else(|| invalid(format!("`{item}` is not a YYYY-MM-DD date")))
                })
                .collect::<MatrixResult<Vec<_>>>()?,
            Some(Value::Null) | None => {
                let start = boundary(source, START_DATE_PROPERTY).ok_or_else(|| {
                    invalid(format!(
                        "neither `{DATE_RANGE_PROPERTY}` nor `{START_DATE_PROPERTY}`/`{END_DATE_PROPERTY}` is set"
                    ))
                })?;
                let end = boundary(source, END_DATE_PROPERTY).ok_or_else(|| {
                    invalid(format!("`{END_DATE_PROPERTY}` is not a YYYY-MM-DD date"))
                })?;
                daily_range(start, end)
            }
            Some(other) => {
                return Err(invalid(format!(
                    "`{DATE_RANGE_PROPERTY}` must be a list of dates, got `{other}`"
                )))
            }
        };

        if dates.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(invalid("dates are not in ascending order".to_string()));
        }
        Ok(dates)
    }

    fn active_date_range(
        &self,
        source: &Record,
        property: &str,
    ) -> MatrixResult<Option<Vec<NaiveDate>>> {
        let items = match source.attr(property) {
            None => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(MatrixError::InvalidActiveRange {
                    property: property.to_string(),
                    message: format!("got `{other}`"),
                })
            }
        };

        items
            .iter()
            .map(|item| {
                item.as_str()
                    .and_then(parse_iso_date)
                    .ok_or_else(|| MatrixError::InvalidActiveRange {
                        property: property.to_string(),
                        message: format!("`{item}` is not a YYYY-MM-DD date"),
                    })
            })
            .collect::<MatrixResult<Vec<_>>>()
            .map(Some)
    }

    fn maintain_cells<S: RecordStore>(
        &self,
        store: &S,
        ctx: &ExecContext,
        field: MatrixField<'_>,
        root_ids: &[RecordId],
    ) -> MatrixResult<()> {
        let config = field.config;
        let cells = config.cells();

        for root_id in root_ids {
            let root = load_record(store, ctx, field.record_type, *root_id)?;
            let source = date_range_source(store, ctx, config, &root)?;
            let in_range: BTreeSet<NaiveDate> = self.date_range(&source)?.into_iter().collect();

            let mut removed_cells = 0;
            for line_id in line_ids(store, ctx, config, &root)? {
                let mut line = load_record(store, ctx, &config.lines().collection, line_id)?;
                let mut stale = Vec::new();
                for cell_id in cell_ids(store, ctx, config, &line)? {
                    let cell = load_record(store, ctx, &cells.collection, cell_id)?;
                    if !in_range.contains(&cell_date(config, &cell)?) {
                        stale.push(cell_id);
                    }
                }
                if stale.is_empty() {
                    continue;
                }
                store.delete(ctx, &cells.collection, &stale)?;
                unlink_owned(store, ctx, &mut line, &cells.property, &stale)?;
                removed_cells += stale.len();
            }

            info!(
                "event=matrix_cell_maintenance module=service status=ok request_id={} root={} removed_cells={}",
                ctx.request_id,
                root.id,
                removed_cells
            );
        }
        Ok(())
    }
}

fn boundary(source: &Record, property: &str) -> Option<NaiveDate> {
    source.text(property).and_then(parse_iso_date)
}
