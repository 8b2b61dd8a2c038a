//! Relational walks over the record store: root → lines → cells.
//!
//! A one-to-many relation is read from the owner's source property when the
//! owner carries an explicit id list there (`line_property` on the root,
//! `cell_property` on a line). Owners that do not carry the property derive
//! it from the back-reference on the owned records instead.

use crate::field::config::MatrixConfig;
use crate::model::calendar::{iso_date, parse_iso_date};
use crate::model::record::{ExecContext, FieldValues, Record, RecordId};
use crate::repo::record_repo::{Criterion, RecordStore};
use crate::service::error::{MatrixError, MatrixResult};
use chrono::NaiveDate;
use serde_json::Value;

/// Loads a record that must exist.
pub fn load_record<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    collection: &str,
    id: RecordId,
) -> MatrixResult<Record> {
    store
        .find_by_id(ctx, collection, id)?
        .ok_or_else(|| MatrixError::RecordNotFound {
            collection: collection.to_string(),
            id,
        })
}

/// Record that owns the date range: the root itself, or the related record
/// named by the configured date-range property.
pub fn date_range_source<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    config: &MatrixConfig,
    root: &Record,
) -> MatrixResult<Record> {
    let Some(source) = config.date_range_source() else {
        return Ok(root.clone());
    };
    let related_id = root
        .reference(&source.property)
        .ok_or_else(|| MatrixError::MissingProperty {
            collection: root.collection.clone(),
            id: root.id,
            property: source.property.clone(),
        })?;
    load_record(store, ctx, &source.collection, related_id)
}

/// Lines of a root, in list order or storage order.
pub fn line_ids<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    config: &MatrixConfig,
    root: &Record,
) -> MatrixResult<Vec<RecordId>> {
    let lines = config.lines();
    if let Some(ids) = listed_ids(root, &lines.property)? {
        return Ok(ids);
    }
    Ok(store.search(
        ctx,
        &lines.collection,
        &[Criterion::equals(lines.inverse.as_str(), root.id)],
        None,
    )?)
}

/// Cells of a line, in list order or storage order.
pub fn cell_ids<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    config: &MatrixConfig,
    line: &Record,
) -> MatrixResult<Vec<RecordId>> {
    let cells = config.cells();
    if let Some(ids) = listed_ids(line, &cells.property)? {
        return Ok(ids);
    }
    Ok(store.search(
        ctx,
        &cells.collection,
        &[Criterion::equals(cells.inverse.as_str(), line.id)],
        None,
    )?)
}

/// The cell of a line at one date, if any.
pub fn find_cell<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    config: &MatrixConfig,
    line: &Record,
    date: NaiveDate,
) -> MatrixResult<Option<RecordId>> {
    let cells = config.cells();
    if let Some(ids) = listed_ids(line, &cells.property)? {
        for cell_id in ids {
            let cell = load_record(store, ctx, &cells.collection, cell_id)?;
            if cell_date(config, &cell)? == date {
                return Ok(Some(cell_id));
            }
        }
        return Ok(None);
    }

    let criteria = [
        Criterion::equals(cells.date_property.as_str(), iso_date(date)),
        Criterion::equals(cells.inverse.as_str(), line.id),
    ];
    Ok(store
        .search(ctx, &cells.collection, &criteria, Some(1))?
        .into_iter()
        .next())
}

/// Stored date of a cell record.
pub fn cell_date(config: &MatrixConfig, cell: &Record) -> MatrixResult<NaiveDate> {
    let property = &config.cells().date_property;
    cell.text(property)
        .and_then(parse_iso_date)
        .ok_or_else(|| MatrixError::InvalidRecord {
            collection: cell.collection.clone(),
            id: cell.id,
            message: format!("`{property}` is not a YYYY-MM-DD date"),
        })
}

/// Appends `id` to the owner's explicit id list. No-op for derived relations.
pub fn link_owned<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    owner: &mut Record,
    property: &str,
    id: RecordId,
) -> MatrixResult<()> {
    let Some(mut ids) = listed_ids(owner, property)? else {
        return Ok(());
    };
    if !ids.contains(&id) {
        ids.push(id);
        store_ids(store, ctx, owner, property, ids)?;
    }
    Ok(())
}

/// Drops `removed` from the owner's explicit id list. No-op for derived
/// relations.
pub fn unlink_owned<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    owner: &mut Record,
    property: &str,
    removed: &[RecordId],
) -> MatrixResult<()> {
    let Some(ids) = listed_ids(owner, property)? else {
        return Ok(());
    };
    let kept: Vec<RecordId> = ids
        .iter()
        .copied()
        .filter(|id| !removed.contains(id))
        .collect();
    if kept.len() != ids.len() {
        store_ids(store, ctx, owner, property, kept)?;
    }
    Ok(())
}

/// Explicit id list held by `property`; `None` when the owner does not carry
/// the property.
fn listed_ids(owner: &Record, property: &str) -> MatrixResult<Option<Vec<RecordId>>> {
    let invalid = |message: String| MatrixError::InvalidRecord {
        collection: owner.collection.clone(),
        id: owner.id,
        message,
    };
    match owner.attr(property) {
        None => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| invalid(format!("`{property}` holds `{item}`, not a record id")))
            })
            .collect::<MatrixResult<Vec<_>>>()
            .map(Some),
        Some(other) => Err(invalid(format!(
            "`{property}` must be a list of record ids, got `{other}`"
        ))),
    }
}

fn store_ids<S: RecordStore>(
    store: &S,
    ctx: &ExecContext,
    owner: &mut Record,
    property: &str,
    ids: Vec<RecordId>,
) -> MatrixResult<()> {
    let value = Value::from(ids);
    let mut values = FieldValues::new();
    values.insert(property.to_string(), value.clone());
    store.update(ctx, &owner.collection, owner.id, &values)?;
    owner.values.insert(property.to_string(), value);
    Ok(())
}
