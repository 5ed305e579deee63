//! CLR Census
//!
//! Inspection of managed runtime processes: what every thread is doing,
//! what work is queued, and how the heap population changes over time.
//!
//! This crate provides the core implementation for the `clr-census` CLI
//! tool:
//! - [`aggregator`] merges call chains into trees and counts heap objects
//! - [`diff`] compares heap histograms
//! - [`runtime`] is the introspection seam, with a heap snapshot backend
//! - [`driver`] walks runtime-version specific queue layouts
//! - [`census`] produces stacks, tasks and handle reports
//! - [`scheduler`] runs one-shot or recurring heap census cycles
//!
//! ## Getting Started
//!
//! ```bash
//! clr-census pstacks app-snapshot.json
//! clr-census heap app-snapshot.json --top 20
//! ```

pub mod aggregator;
pub mod census;
pub mod commands;
pub mod diff;
pub mod driver;
pub mod flamegraph;
pub mod output;
pub mod runtime;
pub mod scheduler;
pub mod utils;
