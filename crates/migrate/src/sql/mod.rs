//! SQL helpers
//!
//! Statement scanning shared by the relational parser and executor.

pub mod splitter;

pub use splitter::{scan, split_statements, ScanOutput, SqlStatement};
