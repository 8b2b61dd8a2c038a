//! Matrix use-case services.
//!
//! # Responsibility
//! - Project roots, lines and cells into editor snapshots.
//! - Reconcile flat editor update sets back into lines and cells.
//! - Keep callers decoupled from the record store layout of a matrix field.

pub mod error;
pub mod matrix_service;
pub mod projector;
pub mod reconciler;
pub mod relations;
pub mod timeline;
