//! Configuration and constants for the CLI.

use std::time::Duration;

/// Default timeout for attaching to a live target
pub const DEFAULT_ATTACH_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the heap census scheduler polls the clock
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Whole-heap scans report progress every this many objects
pub const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Width of the type name column in the diff table
pub const DIFF_TYPE_NAME_WIDTH: usize = 88;

/// Placeholder substituted by the cycle timestamp in output file templates
pub const DATETIME_PLACEHOLDER: &str = "{DateTime}";

/// Generations retained by default ("gen0, gen1, gen2")
pub const DEFAULT_GENERATIONS: &str = "gen0, gen1, gen2";

/// Highest generation number accepted in a generation list
pub const MAX_GENERATION: u32 = 3;

// Well-known runtime type names
pub const FREE_TYPE_NAME: &str = "Free";
pub const OBJECT_TYPE: &str = "System.Object";
pub const DELEGATE_TYPE: &str = "System.Delegate";
pub const TASK_TYPE: &str = "System.Threading.Tasks.Task";
pub const GENERIC_TASK_PREFIX: &str = "System.Threading.Tasks.Task<";
pub const DELAY_PROMISE_TYPE: &str = "System.Threading.Tasks.Task+DelayPromise";
pub const QUEUE_USER_WORK_ITEM_TYPE: &str = "System.Threading.QueueUserWorkItemCallback";
pub const QUEUE_USER_WORK_ITEM_DEFAULT_CONTEXT_TYPE: &str =
    "System.Threading.QueueUserWorkItemCallbackDefaultContext";
pub const WAIT_CALLBACK_TYPE: &str = "System.Threading.WaitCallback";
pub const ACTION_TYPE_PREFIX: &str = "System.Action<";
pub const DEFAULT_SCHEDULER_TYPE: &str = "System.Threading.Tasks.ThreadPoolTaskScheduler";
pub const MOVE_NEXT_RUNNER_RUN: &str =
    "System.Runtime.CompilerServices.AsyncMethodBuilderCore+MoveNextRunner.Run";
pub const THREAD_POOL_GLOBALS_TYPE: &str = "System.Threading.ThreadPoolGlobals";
pub const THREAD_POOL_WORK_QUEUE_TYPE: &str = "System.Threading.ThreadPoolWorkQueue";
pub const WORK_STEALING_QUEUE_LIST_TYPE: &str =
    "System.Threading.ThreadPoolWorkQueue+WorkStealingQueueList";
pub const TIMER_QUEUE_TYPE: &str = "System.Threading.TimerQueue";

/// Module names that identify the core library
pub const CORELIB_MARKERS: &[&str] = &["mscorlib.dll", "corelib."];

// Markers rendered in place of a method name
pub const NO_ACTION: &str = "[no action]";
pub const NO_TARGET: &str = "[no target]";
