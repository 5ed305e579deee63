//! Snapshot diffing.
//!
//! This module compares two keyed count tables (previous vs next heap
//! census) and produces a ranked list of changes plus a console table.
//!
//! # Example
//! ```ignore
//! use clr_census::diff::{diff, rank_changes, render_diff_table};
//!
//! let entries = diff(&previous, &next);
//! let changes = rank_changes(entries, 20);
//! print!("{}", render_diff_table(&changes));
//! ```

mod engine;
mod output;

// Public API exports
pub use engine::{diff, rank_changes, Change, DiffEntry};
pub use output::{group_thousands, render_diff_table, truncate_type_name};
