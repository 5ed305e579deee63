//! Heap census scheduler.
//!
//! Runs census cycles either once or on a recurrence. Each cycle attaches
//! to the target, counts the heap by (type, generation), optionally appends
//! the counts to an output file and prints the changes since the previous
//! cycle.
//!
//! Scheduled mode polls a [`Clock`]: when the next occurrence after the
//! previous poll has been reached, a cycle runs stamped with the polled
//! time. The previous poll time advances on every poll, so an occurrence
//! passed while a long cycle was running still triggers one cycle.
//!
//! # Example
//! ```ignore
//! let (source, token) = cancellation();
//! let census = HeapCensus::new(HeapCensusConfig::default(), target)
//!     .with_schedule(parse_schedule("*/30 * * * * *")?);
//! let handle = census.start(token)?;
//! // later: source.cancel(); handle.join()
//! ```

pub mod cancel;

pub use cancel::{cancellation, CancelSource, CancelToken};

use crate::aggregator::{census_heap, GenerationSet, Histogram};
use crate::diff::{diff, rank_changes, render_diff_table};
use crate::output::write_census_file;
use crate::runtime::RuntimeSource;
use crate::utils::config::DEFAULT_POLL_INTERVAL;
use crate::utils::error::ConfigError;
use chrono::{DateTime, Local};
use cron::Schedule;
use log::{debug, error, info, warn};
use std::io::{self, Write};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Source of the current wall-clock time
pub trait Clock: Send {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Local> + Send,
{
    fn now(&self) -> DateTime<Local> {
        self()
    }
}

/// A recurrence rule: when does it next fire strictly after a time
pub trait Recurrence: Send {
    fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>>;
}

impl Recurrence for Schedule {
    fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.after(after).next()
    }
}

/// Parse a cron expression with a leading seconds field
///
/// # Example
/// ```
/// use clr_census::scheduler::parse_schedule;
///
/// assert!(parse_schedule("*/10 * * * * *").is_ok());
/// assert!(parse_schedule("every ten seconds").is_err());
/// ```
pub fn parse_schedule(expression: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expression.trim()).map_err(|e| ConfigError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Settings of a heap census run
#[derive(Debug, Clone)]
pub struct HeapCensusConfig {
    /// Output file template; `None` writes no file
    pub output_template: Option<String>,

    /// Diff rows to print; `None` prints no diff, `Some(0)` prints all
    pub diff_limit: Option<usize>,

    /// Generations to count
    pub generations: GenerationSet,

    pub poll_interval: Duration,
}

impl Default for HeapCensusConfig {
    fn default() -> Self {
        Self {
            output_template: None,
            diff_limit: None,
            generations: GenerationSet::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// One-shot or recurring heap census over a target
///
/// Owns the previous cycle's histogram; each cycle replaces it.
pub struct HeapCensus {
    config: HeapCensusConfig,
    source: Box<dyn RuntimeSource>,
    clock: Box<dyn Clock>,
    schedule: Option<Box<dyn Recurrence>>,
    out: Box<dyn Write + Send>,
    previous: Histogram,
}

impl HeapCensus {
    /// A one-shot census on the system clock, printing to stdout
    pub fn new(config: HeapCensusConfig, source: impl RuntimeSource + 'static) -> Self {
        Self {
            config,
            source: Box::new(source),
            clock: Box::new(SystemClock),
            schedule: None,
            out: Box::new(io::stdout()),
            previous: Histogram::new(),
        }
    }

    pub fn with_schedule(mut self, schedule: impl Recurrence + 'static) -> Self {
        self.schedule = Some(Box::new(schedule));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Where diff tables are printed
    pub fn with_output(mut self, out: impl Write + Send + 'static) -> Self {
        self.out = Box::new(out);
        self
    }

    pub fn previous(&self) -> &Histogram {
        &self.previous
    }

    /// Run on a dedicated thread; the handle yields the number of cycles
    pub fn start(self, cancel: CancelToken) -> io::Result<JoinHandle<usize>> {
        thread::Builder::new()
            .name("heap-census".to_string())
            .spawn(move || {
                let mut census = self;
                census.run(&cancel)
            })
    }

    /// Run until done (one-shot) or cancelled; returns completed cycles
    ///
    /// Cancellation is observed between cycles and during poll waits; a
    /// running cycle always completes.
    pub fn run(&mut self, cancel: &CancelToken) -> usize {
        let mut previous_poll = self.clock.now();

        let Some(schedule) = self.schedule.take() else {
            info!("Processing heap");
            return usize::from(self.run_cycle(previous_poll));
        };

        let mut cycles = 0;
        while !cancel.is_cancelled() {
            let now = self.clock.now();
            match schedule.next_after(&previous_poll) {
                Some(due) if due <= now => {
                    debug!(
                        "Run processing, time triggered {}. Next processing time: {:?}",
                        due,
                        schedule.next_after(&now)
                    );
                    if self.run_cycle(now) {
                        cycles += 1;
                    }
                    debug!("End processing, for time triggered {}", due);
                }
                Some(_) => {}
                None => {
                    info!("Schedule has no further occurrences");
                    break;
                }
            }

            previous_poll = now;
            if cancel.wait_timeout(self.config.poll_interval) {
                break;
            }
        }

        self.schedule = Some(schedule);
        info!("Heap census stopped after {} cycles", cycles);
        cycles
    }

    /// One census cycle stamped with `timestamp`; false when skipped
    pub fn run_cycle(&mut self, timestamp: DateTime<Local>) -> bool {
        let runtime = match self.source.open() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Can't attach to target, skipping cycle: {}", e);
                return false;
            }
        };

        let histogram = census_heap(runtime.as_ref(), &self.config.generations);

        if let Some(template) = &self.config.output_template {
            if let Err(e) = write_census_file(template, &timestamp, &histogram) {
                error!("Failed to write heap census output: {}", e);
            }
        }

        if let Some(limit) = self.config.diff_limit {
            let changes = rank_changes(diff(&self.previous, &histogram), limit);
            let table = render_diff_table(&changes);
            if !table.is_empty() {
                if let Err(e) = self.out.write_all(table.as_bytes()).and_then(|_| self.out.flush()) {
                    warn!("Failed to print heap diff: {}", e);
                }
            }
        }

        self.previous = histogram;
        true
    }
}
