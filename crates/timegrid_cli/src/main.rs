//! CLI entry point.
//!
//! # Responsibility
//! - Provide a smoke probe verifying `timegrid_core` linkage.
//! - Print the matrix snapshot of one stored root as JSON.
//!
//! Usage:
//! - `timegrid_cli` prints ping/version lines.
//! - `timegrid_cli project <db> <options.json> <root_collection> <root_id>`
//!
//! Logging is enabled when `TIMEGRID_LOG_DIR` names an absolute directory.

use log::error;
use std::process::ExitCode;
use timegrid_core::{
    default_log_level, init_logging, open_db, ExecContext, MatrixFieldOptions,
    MatrixFieldRegistry, MatrixService, RecordId, SqliteRecordStore,
};

const LOG_DIR_ENV: &str = "TIMEGRID_LOG_DIR";
const MATRIX_FIELD_NAME: &str = "matrix";
const USAGE: &str = "usage: timegrid_cli project <db> <options.json> <root_collection> <root_id>";

fn main() -> ExitCode {
    if let Ok(log_dir) = std::env::var(LOG_DIR_ENV) {
        if let Err(err) = init_logging(default_log_level(), &log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            println!("timegrid_core ping={}", timegrid_core::ping());
            println!("timegrid_core version={}", timegrid_core::core_version());
            ExitCode::SUCCESS
        }
        [command, db, options, collection, root_id] if command == "project" => {
            match project(db, options, collection, root_id) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(message) => {
                    error!("event=cli_project module=cli status=error message={message}");
                    eprintln!("error: {message}");
                    ExitCode::FAILURE
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            ExitCode::from(2)
        }
    }
}

fn project(db: &str, options: &str, collection: &str, root_id: &str) -> Result<String, String> {
    let root_id: RecordId = root_id
        .parse()
        .map_err(|_| format!("root id must be an integer, got `{root_id}`"))?;
    let options_text = std::fs::read_to_string(options)
        .map_err(|err| format!("cannot read `{options}`: {err}"))?;
    let options = MatrixFieldOptions::from_json(&options_text).map_err(|err| err.to_string())?;

    let mut registry = MatrixFieldRegistry::new();
    registry
        .register(collection, MATRIX_FIELD_NAME, &options)
        .map_err(|err| err.to_string())?;
    let field = registry
        .field_for(collection)
        .map_err(|err| err.to_string())?;

    let conn = open_db(db).map_err(|err| err.to_string())?;
    let store = SqliteRecordStore::try_new(&conn).map_err(|err| err.to_string())?;
    let service = MatrixService::with_record_timeline(store);

    let snapshots = service
        .project(&ExecContext::new(), field, &[root_id])
        .map_err(|err| err.to_string())?;
    let snapshot = snapshots
        .get(&root_id)
        .ok_or_else(|| format!("no snapshot produced for {collection}({root_id})"))?;
    serde_json::to_string_pretty(snapshot).map_err(|err| err.to_string())
}
