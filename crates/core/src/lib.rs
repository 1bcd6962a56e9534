//! Functional core of the goutdiary persistence layer.
//!
//! Domain types, validation, the last-write-wins decision, the SQL dialect
//! strategy and the repository contracts. Nothing in this crate performs
//! I/O; the `goutdiary` crate implements the contracts against real
//! backends.

pub mod diary;
pub mod serde;
pub mod sql;
pub mod storage;
