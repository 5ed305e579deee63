//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod heap;
pub mod pstacks;
pub mod tasks;

// Re-export main command functions
pub use heap::{build_config, execute_heap, install_cancel_handlers, HeapArgs};
pub use pstacks::{execute_pstacks, PstacksArgs};
pub use tasks::{execute_handles, execute_tasks, TaskScope, TasksArgs};
