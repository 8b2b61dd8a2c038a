//! Record and matrix data shapes shared by the store and the matrix services.
//!
//! # Responsibility
//! - Define the generic `Record` exchanged with record stores.
//! - Define the derived `MatrixSnapshot` payload handed to grid editors.
//!
//! # Invariants
//! - Stored dates use `YYYY-MM-DD`; matrix column keys use `YYYYMMDD`.
//! - Snapshots are derived on every read and never persisted.

pub mod calendar;
pub mod matrix;
pub mod record;
