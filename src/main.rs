//! CLR Census CLI
//!
//! A monitoring tool for managed runtime processes.
//! Shows parallel stacks, pending tasks, GC handles and heap census diffs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clr_census::commands::{
    execute_handles, execute_heap, execute_pstacks, execute_tasks, install_cancel_handlers, HeapArgs,
    PstacksArgs, TaskScope, TasksArgs,
};
use clr_census::driver::{DriverOptions, NullInnerStatePolicy};
use clr_census::scheduler::cancellation;
use clr_census::utils::config::DEFAULT_GENERATIONS;

/// CLR Census - CLR monitoring tool
#[derive(Parser, Debug)]
#[command(name = "clr-census")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Shows parallel stacks
    Pstacks {
        /// Process name, PID, dump or snapshot file
        #[arg(required_unless_present = "replay")]
        target: Option<String>,

        /// Append this sample to a stack interchange file
        #[arg(long, value_name = "FILE", conflicts_with = "replay")]
        record: Option<PathBuf>,

        /// Merge the samples of a stack interchange file instead of attaching
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,

        /// Output path for an SVG flamegraph
        #[arg(long, value_name = "FILE")]
        flamegraph: Option<PathBuf>,
    },

    /// Shows pending tasks and work items grouped by method
    Tasks {
        /// Process name, PID, dump or snapshot file
        target: String,

        /// Every task object on the heap, not only queued ones
        #[arg(long, conflicts_with = "stack")]
        all: bool,

        /// Tasks referenced from thread stacks
        #[arg(long)]
        stack: bool,

        /// Skip delay timers whose awaiting state machine can't be found
        #[arg(long)]
        skip_orphan_timers: bool,
    },

    /// Shows GC handles grouped by the type of their target
    Handles {
        /// Process name, PID, dump or snapshot file
        target: String,
    },

    /// Analyze heap
    Heap {
        /// Process name, PID, dump or snapshot file
        target: String,

        /// Cron schedule, with seconds (e.g. "*/30 * * * * *")
        #[arg(short, long)]
        schedule: Option<String>,

        /// Output filename template, may contain {DateTime}. Default - don't create output files
        #[arg(short, long)]
        output: Option<String>,

        /// GC generations to collect
        #[arg(short, long = "gen", default_value = DEFAULT_GENERATIONS)]
        generations: String,

        /// Count of diff rows to display; 0 - without limit. Default - diff disabled
        #[arg(short, long)]
        top: Option<usize>,
    },
}

fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    let mut stdout = io::stdout().lock();

    match command {
        Commands::Pstacks {
            target,
            record,
            replay,
            flamegraph,
        } => {
            let args = PstacksArgs {
                target,
                record,
                replay,
                flamegraph,
            };
            execute_pstacks(&args, &mut stdout)?;
        }

        Commands::Tasks {
            target,
            all,
            stack,
            skip_orphan_timers,
        } => {
            let scope = if all {
                TaskScope::All
            } else if stack {
                TaskScope::Stack
            } else {
                TaskScope::Pending
            };
            let null_inner_state = if skip_orphan_timers {
                NullInnerStatePolicy::Skip
            } else {
                NullInnerStatePolicy::YieldWrapper
            };
            let args = TasksArgs {
                target,
                scope,
                driver: DriverOptions { null_inner_state },
            };
            execute_tasks(&args, &mut stdout)?;
        }

        Commands::Handles { target } => {
            execute_handles(&target, &mut stdout)?;
        }

        Commands::Heap {
            target,
            schedule,
            output,
            generations,
            top,
        } => {
            let args = HeapArgs {
                target,
                schedule,
                output,
                generations,
                top,
            };
            // The census thread prints diffs itself.
            drop(stdout);

            let (source, token) = cancellation();
            if args.schedule.is_some() {
                install_cancel_handlers(source.clone())?;
            }
            execute_heap(&args, token)?;
            drop(source);
        }
    }

    Ok(())
}
