//! SVG flamegraph generation using the inferno library.
//!
//! Chains are folded into `frame;frame;frame count` lines, one per distinct
//! path, which is the input format inferno expects.

use crate::utils::error::FlamegraphError;
use inferno::flamegraph::{self, Options};
use log::info;
use std::collections::HashMap;
use std::fmt::Display;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: Option<usize>,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Parallel Stacks".to_string(),
            width: None,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Fold chains into sorted `a;b;c count` lines
///
/// `;` separates frames in the folded format, so it is replaced by `:`
/// inside frame names.
pub fn fold_chains<T: Display>(chains: &[Vec<T>]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for chain in chains.iter().filter(|c| !c.is_empty()) {
        let path = chain
            .iter()
            .map(|frame| frame.to_string().replace(';', ":"))
            .collect::<Vec<_>>()
            .join(";");
        *counts.entry(path).or_insert(0) += 1;
    }

    let mut lines: Vec<String> = counts
        .into_iter()
        .map(|(path, count)| format!("{} {}", path, count))
        .collect();
    lines.sort();
    lines
}

/// Generate an SVG flamegraph where each chain counts as one thread
pub fn generate_flamegraph<T: Display>(
    chains: &[Vec<T>],
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    let folded = fold_chains(chains);
    if folded.is_empty() {
        return Err(FlamegraphError::EmptyStacks);
    }

    let config = config.cloned().unwrap_or_default();
    info!("Generating flamegraph from {} distinct stacks", folded.len());

    let mut options = Options::default();
    options.title = config.title;
    options.count_name = "threads".to_string();
    options.image_width = config.width;

    let mut svg = Vec::new();
    flamegraph::from_lines(&mut options, folded.iter().map(String::as_str), &mut svg)
        .map_err(|e| FlamegraphError::RenderFailed(e.to_string()))?;

    let svg = String::from_utf8(svg).map_err(|e| FlamegraphError::RenderFailed(e.to_string()))?;
    info!("Flamegraph generated successfully ({} bytes)", svg.len());
    Ok(svg)
}
