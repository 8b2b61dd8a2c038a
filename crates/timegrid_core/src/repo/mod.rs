//! Record store abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the collection-scoped data access contract used by services.
//! - Isolate SQLite query details from matrix orchestration.
//!
//! # Invariants
//! - Store APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.

pub mod record_repo;
