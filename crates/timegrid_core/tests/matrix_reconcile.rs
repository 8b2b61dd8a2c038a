mod common;

use common::{
    cells_of, count, create, lines_of, registry, seed_cell, seed_line, seed_partner, seed_report,
    values, CELL, LINE, REPORT,
};
use serde_json::json;
use timegrid_core::db::open_db_in_memory;
use timegrid_core::{
    ExecContext, FieldIdError, FieldValues, MatrixError, MatrixService, RecordStore,
    SqliteRecordStore, StoreError,
};

#[test]
fn new_line_keys_create_a_line_with_its_cells() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(
            &ctx,
            field,
            &[report],
            &values(json!({
                "res_new_supplier": acme.to_string(),
                "cell_new_20240101": "12"
            })),
        )
        .unwrap();

    let lines = lines_of(store, &ctx, report);
    assert_eq!(lines.len(), 1);
    assert_eq!(summary.created_lines, vec![lines[0].id]);
    assert_eq!(summary.created_cells, 1);
    assert_eq!(lines[0].reference("supplier"), Some(acme));

    let cells = cells_of(store, &ctx, lines[0].id);
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].values.get("date"), Some(&json!("2024-01-01")));
    assert_eq!(cells[0].values.get("quantity"), Some(&json!("12")));
}

#[test]
fn repeated_cell_updates_keep_a_single_cell() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);
    let cell_key = format!("cell_{line}_20240101");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let first = service
        .reconcile(&ctx, field, &[report], &values(json!({ cell_key.clone(): 1 })))
        .unwrap();
    let second = service
        .reconcile(&ctx, field, &[report], &values(json!({ cell_key: 2.5 })))
        .unwrap();

    assert_eq!((first.created_cells, first.updated_cells), (1, 0));
    assert_eq!((second.created_cells, second.updated_cells), (0, 1));
    let cells = cells_of(store, &ctx, line);
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].values.get("quantity"), Some(&json!(2.5)));
}

#[test]
fn lines_missing_from_the_update_set_are_deleted_with_their_cells() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let kept = seed_line(store, &ctx, report, acme);
    let dropped = seed_line(store, &ctx, report, acme);
    seed_cell(store, &ctx, kept, "2024-01-01", json!(1));
    seed_cell(store, &ctx, dropped, "2024-01-01", json!(2));
    seed_cell(store, &ctx, dropped, "2024-01-02", json!(3));

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(
            &ctx,
            field,
            &[report],
            &values(json!({ format!("res_{kept}_supplier"): acme })),
        )
        .unwrap();

    assert_eq!(summary.deleted_lines, vec![dropped]);
    assert_eq!(summary.deleted_cells, 2);
    let remaining: Vec<_> = lines_of(store, &ctx, report)
        .into_iter()
        .map(|line| line.id)
        .collect();
    assert_eq!(remaining, vec![kept]);
    assert!(cells_of(store, &ctx, dropped).is_empty());
    assert_eq!(cells_of(store, &ctx, kept).len(), 1);
}

#[test]
fn update_set_without_matrix_keys_clears_every_line() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    seed_line(store, &ctx, report, acme);
    seed_line(store, &ctx, report, acme);

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(&ctx, field, &[report], &values(json!({"name": "renamed"})))
        .unwrap();

    assert_eq!(summary.deleted_lines.len(), 2);
    assert_eq!(count(store, &ctx, LINE), 0);
}

#[test]
fn malformed_key_aborts_the_batch_before_any_write() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let err = service
        .reconcile(
            &ctx,
            field,
            &[report],
            &values(json!({
                "res_new_supplier": acme,
                "cell_new_20240101": 4,
                "cell_new_2024-01-02": 5
            })),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::FieldId(FieldIdError::MalformedDate { .. })
    ));

    let err = service
        .reconcile(&ctx, field, &[report], &values(json!({"res_abc_supplier": acme})))
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::FieldId(FieldIdError::ConventionViolation(_))
    ));

    let lines: Vec<_> = lines_of(store, &ctx, report)
        .into_iter()
        .map(|line| line.id)
        .collect();
    assert_eq!(lines, vec![line]);
    assert_eq!(count(store, &ctx, CELL), 0);
}

#[test]
fn cells_of_an_unknown_line_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();
    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let err = service
        .reconcile(&ctx, field, &[report], &values(json!({"cell_999_20240101": 3})))
        .unwrap_err();
    assert!(matches!(err, MatrixError::RecordNotFound { id: 999, .. }));
    assert_eq!(count(store, &ctx, CELL), 0);
}

#[test]
fn explicit_id_lists_follow_created_and_deleted_records() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let kept = seed_line(store, &ctx, report, acme);
    let dropped = seed_line(store, &ctx, report, acme);
    store
        .update(&ctx, REPORT, report, &values(json!({"line_ids": [kept, dropped]})))
        .unwrap();
    store
        .update(&ctx, LINE, kept, &values(json!({"cell_ids": []})))
        .unwrap();

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let submitted = values(json!({
        format!("cell_{kept}_20240101"): 4,
        "res_new_supplier": acme
    }));
    let summary = service
        .reconcile(&ctx, field, &[report], &submitted)
        .unwrap();

    assert_eq!(summary.deleted_lines, vec![dropped]);
    let created = summary.created_lines[0];
    let stored = store.find_by_id(&ctx, REPORT, report).unwrap().unwrap();
    assert_eq!(stored.values["line_ids"], json!([kept, created]));

    let cells = cells_of(store, &ctx, kept);
    assert_eq!(cells.len(), 1);
    let stored = store.find_by_id(&ctx, LINE, kept).unwrap().unwrap();
    assert_eq!(stored.values["cell_ids"], json!([cells[0].id]));

    let again = service
        .reconcile(&ctx, field, &[report], &submitted)
        .unwrap();
    assert_eq!((again.created_cells, again.updated_cells), (0, 1));
    assert_eq!(count(store, &ctx, CELL), 1);
}

#[test]
fn editor_bookkeeping_keys_are_skipped() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(
            &ctx,
            field,
            &[report],
            &values(json!({
                format!("res_{line}_supplier"): acme,
                "cell_template_20240101": 0.0,
                "res_template_supplier": 0,
                "res_dummy1_supplier": "",
                "resource_list_supplier": [[acme, "Acme"]]
            })),
        )
        .unwrap();

    assert!(summary.is_structurally_unchanged());
    assert!(summary.updated_lines.is_empty());
    assert_eq!(count(store, &ctx, LINE), 1);
    assert_eq!(count(store, &ctx, CELL), 0);
}

#[test]
fn changed_resource_rewrites_existing_line() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let globex = seed_partner(store, &ctx, "Globex");
    let line = seed_line(store, &ctx, report, acme);

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(
            &ctx,
            field,
            &[report],
            &values(json!({ format!("res_{line}_supplier"): format!(" {globex} ") })),
        )
        .unwrap();

    assert_eq!(summary.updated_lines, vec![line]);
    let stored = store.find_by_id(&ctx, LINE, line).unwrap().unwrap();
    assert_eq!(stored.reference("supplier"), Some(globex));
    assert_eq!(stored.reference("report_id"), Some(report));
}

#[test]
fn resource_value_must_be_an_entity_id() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();
    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let err = service
        .reconcile(&ctx, field, &[report], &values(json!({"res_new_supplier": "Acme"})))
        .unwrap_err();
    match err {
        MatrixError::InvalidResourceValue { field, value } => {
            assert_eq!(field, "res_new_supplier");
            assert_eq!(value, "\"Acme\"");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(store, &ctx, LINE), 0);
}

#[test]
fn unmodified_snapshot_round_trips_without_structural_changes() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-03");
    let acme = seed_partner(store, &ctx, "Acme");
    let globex = seed_partner(store, &ctx, "Globex");
    let first = seed_line(store, &ctx, report, acme);
    let second = seed_line(store, &ctx, report, globex);
    seed_cell(store, &ctx, first, "2024-01-01", json!(5));
    seed_cell(store, &ctx, first, "2024-01-03", json!("7.5"));
    seed_cell(store, &ctx, second, "2024-01-02", json!(null));

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let before = service.project(&ctx, field, &[report]).unwrap();
    let submitted = before[&report].flat_fields();
    assert!(submitted.keys().all(|key| !key.contains("template")));

    let summary = service.reconcile(&ctx, field, &[report], &submitted).unwrap();
    assert!(summary.is_structurally_unchanged());
    assert!(summary.updated_lines.is_empty());
    assert_eq!(summary.updated_cells, 3);

    let after = service.project(&ctx, field, &[report]).unwrap();
    assert_eq!(before, after);
}

#[test]
fn same_update_set_applies_to_every_root() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let january = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let february = seed_report(store, &ctx, "2024-02-01", "2024-02-02");
    let acme = seed_partner(store, &ctx, "Acme");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let summary = service
        .reconcile(
            &ctx,
            field,
            &[january, february],
            &values(json!({"res_new1_supplier": acme})),
        )
        .unwrap();

    assert_eq!(summary.created_lines.len(), 2);
    assert_eq!(lines_of(store, &ctx, january).len(), 1);
    assert_eq!(lines_of(store, &ctx, february).len(), 1);
}

#[test]
fn write_strips_virtual_keys_and_runs_cell_maintenance() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-03");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);
    seed_cell(store, &ctx, line, "2024-01-01", json!(1));
    seed_cell(store, &ctx, line, "2024-01-02", json!(2));
    seed_cell(store, &ctx, line, "2024-01-03", json!(3));

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    service
        .write(
            &ctx,
            field,
            &[report],
            &values(json!({
                "end_date": "2024-01-02",
                format!("res_{line}_supplier"): acme,
                format!("cell_{line}_20240101"): 9,
                "resource_list_supplier": [[acme, "Acme"]]
            })),
        )
        .unwrap();

    let stored = store.find_by_id(&ctx, REPORT, report).unwrap().unwrap();
    assert_eq!(stored.text("end_date"), Some("2024-01-02"));
    assert!(stored.values.keys().all(|key| !key.starts_with("res")));
    assert!(!stored.values.contains_key(&format!("cell_{line}_20240101")));

    let cells: Vec<(String, serde_json::Value)> = cells_of(store, &ctx, line)
        .into_iter()
        .map(|cell| {
            (
                cell.text("date").unwrap().to_string(),
                cell.values["quantity"].clone(),
            )
        })
        .collect();
    assert_eq!(
        cells,
        vec![
            ("2024-01-01".to_string(), json!(9)),
            ("2024-01-02".to_string(), json!(2)),
        ]
    );
}

#[test]
fn write_with_hands_stored_fields_to_base_write() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let mut seen: Option<FieldValues> = None;
    let output = service
        .write_with(
            &ctx,
            field,
            &[report],
            &values(json!({
                "name": "renamed",
                "res_new_supplier": acme,
                "cell_new_20240102": 4
            })),
            |stored| {
                seen = Some(stored.clone());
                Ok(42)
            },
        )
        .unwrap();

    assert_eq!(output, 42);
    assert_eq!(seen, Some(values(json!({"name": "renamed"}))));
    assert_eq!(lines_of(store, &ctx, report).len(), 1);
}

#[test]
fn failed_write_rolls_back_base_write_and_matrix_changes() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let err = service
        .write(
            &ctx,
            field,
            &[report, 404],
            &values(json!({
                "name": "renamed",
                "res_new_supplier": acme
            })),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::Store(StoreError::NotFound { id: 404, .. })
    ));

    let stored = store.find_by_id(&ctx, REPORT, report).unwrap().unwrap();
    assert_eq!(stored.text("name"), Some("January report"));
    let lines: Vec<_> = lines_of(store, &ctx, report)
        .into_iter()
        .map(|line| line.id)
        .collect();
    assert_eq!(lines, vec![line]);
}

#[test]
fn read_answers_virtual_keys_from_lines_and_cells() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);
    seed_cell(store, &ctx, line, "2024-01-01", json!(5));

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let fields: Vec<String> = [
        "name".to_string(),
        format!("cell_{line}_20240101"),
        format!("cell_{line}_20240102"),
        format!("res_{line}_supplier"),
        "res_new_supplier".to_string(),
        "cell_new3_20240101".to_string(),
        "resource_list_supplier".to_string(),
    ]
    .into();

    let rows = service.read(&ctx, field, &[report], &fields).unwrap();
    assert_eq!(
        serde_json::Value::Object(rows[&report].clone()),
        json!({
            "name": "January report",
            format!("cell_{line}_20240101"): 5,
            format!("cell_{line}_20240102"): null,
            format!("res_{line}_supplier"): acme,
            "res_new_supplier": null,
            "cell_new3_20240101": null
        })
    );
}

#[test]
fn read_with_keeps_values_returned_by_base_read() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();

    let report = seed_report(store, &ctx, "2024-01-01", "2024-01-02");
    let acme = seed_partner(store, &ctx, "Acme");
    let line = seed_line(store, &ctx, report, acme);
    let cell_key = format!("cell_{line}_20240101");

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let mut requested_stored = Vec::new();
    let rows = service
        .read_with(
            &ctx,
            field,
            &[report],
            &["name".to_string(), cell_key.clone()],
            |stored_fields| {
                requested_stored = stored_fields.to_vec();
                let mut rows = std::collections::BTreeMap::new();
                rows.insert(report, values(json!({ cell_key.clone(): "cached" })));
                Ok(rows)
            },
        )
        .unwrap();

    assert_eq!(requested_stored, vec!["name".to_string()]);
    assert_eq!(rows[&report].get(&cell_key), Some(&json!("cached")));
}

#[test]
fn read_rejects_keys_outside_the_grammar() {
    let conn = open_db_in_memory().unwrap();
    let service = MatrixService::with_record_timeline(SqliteRecordStore::try_new(&conn).unwrap());
    let store = service.store();
    let ctx = ExecContext::new();
    let report = create(store, &ctx, REPORT, json!({"name": "x"}));

    let registry = registry();
    let field = registry.field_for(REPORT).unwrap();
    let err = service
        .read(&ctx, field, &[report], &["cell_1_2024".to_string()])
        .unwrap_err();
    assert!(matches!(
        err,
        MatrixError::FieldId(FieldIdError::MalformedDate { .. })
    ));
}
