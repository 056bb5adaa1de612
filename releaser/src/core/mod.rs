//! Deterministic, pure release lifecycle logic.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (listings, record lines, marker names) and return deterministic
//! outputs suitable for tests.

pub mod inventory;
pub mod layout;
pub mod marker;
pub mod record;
pub mod release_id;
pub mod retention;
