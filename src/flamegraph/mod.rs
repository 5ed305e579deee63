//! Flamegraph generation using the inferno library.
//!
//! This module converts merged call chains into SVG flamegraphs, where the
//! width of a frame is the number of threads that were inside it.

pub mod generator;

// Re-export main types
pub use generator::{fold_chains, generate_flamegraph, FlamegraphConfig};
