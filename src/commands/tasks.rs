//! Tasks and handles commands.

use crate::census::{handle_type_names, write_grouped_handles, write_grouped_tasks, TaskCensus};
use crate::driver::DriverOptions;
use crate::runtime::{attach, Target};
use anyhow::{Context, Result};
use log::info;
use std::io::Write;

/// Which tasks to list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskScope {
    /// Queued work items and pending timers
    #[default]
    Pending,
    /// Every task object on the heap
    All,
    /// Tasks referenced from thread stacks
    Stack,
}

#[derive(Debug, Clone)]
pub struct TasksArgs {
    pub target: String,
    pub scope: TaskScope,
    pub driver: DriverOptions,
}

pub fn execute_tasks<W: Write>(args: &TasksArgs, out: &mut W) -> Result<()> {
    let runtime = attach(&Target::parse(&args.target))
        .with_context(|| format!("Failed to attach to '{}'", args.target))?;
    let mut census = TaskCensus::new(runtime.as_ref(), args.driver)
        .context("Failed to inspect the runtime's thread pool")?;

    let tasks = match args.scope {
        TaskScope::Pending => census.get_tasks().context("Failed to enumerate pending work")?,
        TaskScope::All => census.get_all_tasks(),
        TaskScope::Stack => census.get_stack_tasks(),
    };
    info!("Found {} tasks", tasks.len());

    write_grouped_tasks(out, &tasks)?;
    Ok(())
}

pub fn execute_handles<W: Write>(target: &str, out: &mut W) -> Result<()> {
    let runtime = attach(&Target::parse(target))
        .with_context(|| format!("Failed to attach to '{}'", target))?;

    let names = handle_type_names(runtime.as_ref());
    info!("Found {} handles", names.len());

    write_grouped_handles(out, &names)?;
    Ok(())
}
