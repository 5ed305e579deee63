//! Parallel stacks command.
//!
//! The pstacks command:
//! 1. Collects every thread's stack (live target) or reads recorded samples
//! 2. Optionally records the live sample to an interchange file
//! 3. Optionally writes a flamegraph
//! 4. Prints the merged tree

use crate::aggregator::{merge_chains, tree_to_string};
use crate::census::get_stack_traces;
use crate::flamegraph::{generate_flamegraph, FlamegraphConfig};
use crate::output::{append_sample, read_chains_file};
use crate::runtime::{attach, Target};
use anyhow::{Context, Result};
use log::{debug, info};
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Arguments for the pstacks command
#[derive(Debug, Clone, Default)]
pub struct PstacksArgs {
    /// Process name, PID, dump or snapshot file; unused with `replay`
    pub target: Option<String>,

    /// Append the live sample to this interchange file
    pub record: Option<PathBuf>,

    /// Merge samples from this interchange file instead of a live target
    pub replay: Option<PathBuf>,

    /// Write an SVG flamegraph of the stacks here
    pub flamegraph: Option<PathBuf>,
}

pub fn execute_pstacks<W: Write>(args: &PstacksArgs, out: &mut W) -> Result<()> {
    if let Some(replay) = &args.replay {
        let chains = read_chains_file(replay)
            .with_context(|| format!("Failed to read stack samples from {}", replay.display()))?;
        info!("Replaying {} stacks from {}", chains.len(), replay.display());
        return report(chains, args.flamegraph.as_deref(), out);
    }

    let target = args
        .target
        .as_deref()
        .context("A target is required unless --replay is given")?;
    let runtime = attach(&Target::parse(target))
        .with_context(|| format!("Failed to attach to '{}'", target))?;

    let stacks = get_stack_traces(runtime.as_ref());
    debug!("Collected {} non-empty stacks", stacks.len());

    if let Some(record) = &args.record {
        append_sample(record, &stacks)
            .with_context(|| format!("Failed to record stacks to {}", record.display()))?;
        info!("Recorded sample to {}", record.display());
    }

    report(stacks, args.flamegraph.as_deref(), out)
}

fn report<T: Display, W: Write>(chains: Vec<Vec<T>>, flamegraph: Option<&Path>, out: &mut W) -> Result<()> {
    if let Some(path) = flamegraph {
        let svg = generate_flamegraph(&chains, Some(&FlamegraphConfig::new()))
            .context("Failed to generate flamegraph")?;
        std::fs::write(path, svg)
            .with_context(|| format!("Failed to write flamegraph to {}", path.display()))?;
        info!("Flamegraph written to {}", path.display());
    }

    let tree = merge_chains(chains);
    write!(out, "Parallel Stacks:\n\n{}", tree_to_string(&tree))?;
    Ok(())
}
