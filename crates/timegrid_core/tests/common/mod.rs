//! Shared fixtures for matrix integration tests: an activity report root
//! with supplier-keyed lines and dated quantity cells.
#![allow(dead_code)]

use serde_json::{json, Value};
use timegrid_core::{
    Criterion, ExecContext, FieldValues, MatrixFieldOptions, MatrixFieldRegistry, Record,
    RecordId, RecordStore, SqliteRecordStore,
};

pub const REPORT: &str = "activity.report";
pub const LINE: &str = "activity.report.line";
pub const CELL: &str = "activity.report.cell";
pub const PARTNER: &str = "res.partner";
pub const FIELD_NAME: &str = "line_matrix";

pub fn options_json() -> Value {
    json!({
        "line_property": "line_ids",
        "line_type": LINE,
        "line_inverse_property": "report_id",
        "line_resource_property_list": [["supplier", PARTNER]],
        "cell_property": "cell_ids",
        "cell_type": CELL,
        "cell_value_property": "quantity"
    })
}

pub fn registry_with(options: Value) -> MatrixFieldRegistry {
    let options = MatrixFieldOptions::from_json(&options.to_string()).unwrap();
    let mut registry = MatrixFieldRegistry::new();
    registry.register(REPORT, FIELD_NAME, &options).unwrap();
    registry
}

pub fn registry() -> MatrixFieldRegistry {
    registry_with(options_json())
}

pub fn values(raw: Value) -> FieldValues {
    raw.as_object().unwrap().clone()
}

pub fn create(store: &SqliteRecordStore<'_>, ctx: &ExecContext, collection: &str, raw: Value) -> RecordId {
    store.create(ctx, collection, &values(raw)).unwrap()
}

pub fn seed_report(
    store: &SqliteRecordStore<'_>,
    ctx: &ExecContext,
    start: &str,
    end: &str,
) -> RecordId {
    create(
        store,
        ctx,
        REPORT,
        json!({"name": "January report", "start_date": start, "end_date": end}),
    )
}

pub fn seed_partner(store: &SqliteRecordStore<'_>, ctx: &ExecContext, name: &str) -> RecordId {
    create(store, ctx, PARTNER, json!({ "name": name }))
}

pub fn seed_line(
    store: &SqliteRecordStore<'_>,
    ctx: &ExecContext,
    report_id: RecordId,
    supplier_id: RecordId,
) -> RecordId {
    create(
        store,
        ctx,
        LINE,
        json!({"report_id": report_id, "supplier": supplier_id}),
    )
}

pub fn seed_cell(
    store: &SqliteRecordStore<'_>,
    ctx: &ExecContext,
    line_id: RecordId,
    date: &str,
    quantity: Value,
) -> RecordId {
    create(
        store,
        ctx,
        CELL,
        json!({"line_id": line_id, "date": date, "quantity": quantity}),
    )
}

pub fn lines_of(store: &SqliteRecordStore<'_>, ctx: &ExecContext, report_id: RecordId) -> Vec<Record> {
    load_all(store, ctx, LINE, Criterion::equals("report_id", report_id))
}

pub fn cells_of(store: &SqliteRecordStore<'_>, ctx: &ExecContext, line_id: RecordId) -> Vec<Record> {
    load_all(store, ctx, CELL, Criterion::equals("line_id", line_id))
}

pub fn count(store: &SqliteRecordStore<'_>, ctx: &ExecContext, collection: &str) -> usize {
    store.search(ctx, collection, &[], None).unwrap().len()
}

fn load_all(
    store: &SqliteRecordStore<'_>,
    ctx: &ExecContext,
    collection: &str,
    criterion: Criterion,
) -> Vec<Record> {
    store
        .search(ctx, collection, &[criterion], None)
        .unwrap()
        .into_iter()
        .map(|id| store.find_by_id(ctx, collection, id).unwrap().unwrap())
        .collect()
}
