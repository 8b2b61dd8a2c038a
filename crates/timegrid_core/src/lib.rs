//! Core domain logic for timegrid matrix fields.
//! This crate owns the identifier grammar and the projection/reconciliation
//! rules between an aggregate root, its lines and their dated cells.

pub mod db;
pub mod field;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use field::config::{ConfigError, MatrixConfig, MatrixFieldOptions};
pub use field::field_id::{FieldId, FieldIdError, LineKey};
pub use field::registry::{MatrixField, MatrixFieldRegistry};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::matrix::{MatrixRow, MatrixSnapshot, ResourceCatalog, RowId, RowResource};
pub use model::record::{ExecContext, FieldValues, Record, RecordId};
pub use repo::record_repo::{Criterion, RecordStore, SqliteRecordStore, StoreError, StoreResult};
pub use service::error::{MatrixError, MatrixResult};
pub use service::matrix_service::MatrixService;
pub use service::reconciler::ReconcileSummary;
pub use service::timeline::{RecordTimeline, Timeline};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
