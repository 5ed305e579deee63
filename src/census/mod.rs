//! Census producers.
//!
//! Thin layers turning provider facts into the chains and records the
//! reports consume:
//! - Call stacks, one chain of frames per thread
//! - Pending tasks and work items, resolved to method names
//! - GC handles, by the type of the object they keep alive

pub mod handles;
pub mod stacks;
pub mod tasks;

pub use handles::{handle_type_names, write_grouped_handles};
pub use stacks::{get_stack_traces, Frame};
pub use tasks::{readable_type_name, write_grouped_tasks, TaskCensus};

use std::collections::HashMap;
use std::io::{self, Write};

/// Count equal names and write `count<TAB>name` lines, most frequent first
///
/// Equal counts are ordered by name so reports are stable across runs.
fn write_grouped<W: Write>(w: &mut W, names: impl IntoIterator<Item = String>) -> io::Result<()> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for name in names {
        *counts.entry(name).or_insert(0) += 1;
    }

    let mut groups: Vec<(String, usize)> = counts.into_iter().collect();
    groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    for (name, count) in groups {
        writeln!(w, "{}\t{}", count, readable_type_name(&name))?;
    }
    Ok(())
}
