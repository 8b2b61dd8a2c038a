//! Matrix field declaration and addressing.
//!
//! # Responsibility
//! - Decode and compose the flat identifiers exchanged with the editor.
//! - Validate declared field options into an immutable configuration.
//! - Register configurations per (record type, field name).

pub mod config;
pub mod field_id;
pub mod registry;
