//! Heap census command.
//!
//! Validates the configuration and the target up front (both are fatal),
//! then runs the census on its own thread until it completes or the user
//! cancels it.

use crate::aggregator::GenerationSet;
use crate::runtime::{RuntimeSource, Target};
use crate::scheduler::{parse_schedule, CancelSource, CancelToken, HeapCensus, HeapCensusConfig};
use crate::utils::config::DEFAULT_GENERATIONS;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::io::BufRead;
use std::thread;

/// Arguments for the heap command
#[derive(Debug, Clone)]
pub struct HeapArgs {
    pub target: String,

    /// Cron expression with seconds; `None` runs a single cycle
    pub schedule: Option<String>,

    /// Output file template, may contain `{DateTime}`
    pub output: Option<String>,

    /// Generation list, e.g. "gen0, gen2"
    pub generations: String,

    /// Diff rows to print; `None` disables the diff, 0 prints all
    pub top: Option<usize>,
}

impl Default for HeapArgs {
    fn default() -> Self {
        Self {
            target: String::new(),
            schedule: None,
            output: None,
            generations: DEFAULT_GENERATIONS.to_string(),
            top: None,
        }
    }
}

/// Build the census configuration; any invalid setting is an error
pub fn build_config(args: &HeapArgs) -> Result<HeapCensusConfig> {
    let generations: GenerationSet = args
        .generations
        .parse()
        .context("Can't parse '--gen' option")?;

    Ok(HeapCensusConfig {
        output_template: args.output.clone().filter(|t| !t.trim().is_empty()),
        diff_limit: args.top,
        generations,
        ..Default::default()
    })
}

pub fn execute_heap(args: &HeapArgs, cancel: CancelToken) -> Result<()> {
    let config = build_config(args)?;
    let schedule = match args.schedule.as_deref().map(str::trim) {
        Some(expression) if !expression.is_empty() => Some(parse_schedule(expression)?),
        _ => None,
    };

    let target = Target::parse(&args.target);
    // Fail fast: later cycles only log attach failures.
    target
        .open()
        .with_context(|| format!("Failed to attach to '{}'", args.target))?;

    debug!("Heap census config: {:?}", config);
    info!("Started");

    let mut census = HeapCensus::new(config, target);
    if let Some(schedule) = schedule {
        census = census.with_schedule(schedule);
    }

    let handle = census.start(cancel).context("Failed to start heap census")?;
    let cycles = handle
        .join()
        .map_err(|_| anyhow!("Heap census thread panicked"))?;
    debug!("Heap census finished after {} cycles", cycles);
    Ok(())
}

/// Cancel on Ctrl+C, SIGTERM or Enter
pub fn install_cancel_handlers(source: CancelSource) -> Result<()> {
    info!("Press `Ctrl + C` or Enter to exit...");

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
        let source = source.clone();
        thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    debug!("Received signal {}", signal);
                    info!("Stop executing. Wait...");
                    source.cancel();
                }
            })
            .context("Failed to start signal thread")?;
    }

    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                // EOF: stdin is not interactive, keep running until a signal
                Ok(0) => return,
                Ok(_) => info!("Stop executing. Wait..."),
                Err(e) => warn!("Can't read stdin: {}", e),
            }
            source.cancel();
        })
        .context("Failed to start stdin thread")?;

    Ok(())
}
