//! Aggregation of census facts into compact reports.
//!
//! This module turns raw per-thread and per-object facts into:
//! - A merged call tree (parallel stacks)
//! - A heap histogram keyed by type name and generation

pub mod histogram;
pub mod tree;

// Re-export main types and functions
pub use histogram::{census_heap, histogram, GenerationSet, Histogram, HistogramBuilder, HistogramKey};
pub use tree::{merge_chains, render_tree, tree_to_string, TreeNode};
