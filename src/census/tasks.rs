//! Task census: pending work items, timers and task objects.

use super::write_grouped;
use crate::driver::{ClrDriver, DriverOptions, ObjectInfo, TaskInfo};
use crate::runtime::RuntimeProvider;
use crate::utils::config::{FREE_TYPE_NAME, PROGRESS_INTERVAL};
use crate::utils::error::DriverError;
use log::{debug, info, warn};
use std::borrow::Cow;
use std::io::{self, Write};

/// Resolves pending work of one attached runtime
pub struct TaskCensus<'a> {
    driver: ClrDriver<'a>,
}

impl<'a> TaskCensus<'a> {
    pub fn new(runtime: &'a dyn RuntimeProvider, options: DriverOptions) -> Result<Self, DriverError> {
        Ok(Self {
            driver: ClrDriver::new(runtime, options)?,
        })
    }

    /// Queued work items followed by pending timers
    pub fn get_tasks(&self) -> Result<Vec<TaskInfo>, DriverError> {
        let mut items = self.driver.enumerate_managed_work_items()?;
        items.extend(self.driver.enumerate_timer_tasks()?);
        Ok(self.resolve(items))
    }

    /// Every task object on the heap, whether queued, running or waiting
    pub fn get_all_tasks(&mut self) -> Vec<TaskInfo> {
        let runtime = self.driver.base().runtime();
        let mut tasks = Vec::new();
        let mut scanned: u64 = 0;

        for address in runtime.object_addresses().filter(|&a| a != 0) {
            let ty = match runtime.object_type(address) {
                Ok(ty) => ty,
                Err(e) => {
                    warn!("Address '{:#x}' can't be read: {}", address, e);
                    continue;
                }
            };
            if runtime.type_name(ty) == Some(FREE_TYPE_NAME) {
                continue;
            }

            if self.driver.is_task_descendant(ty) {
                tasks.extend(self.resolve_one(ObjectInfo { address, ty }));
            }

            scanned += 1;
            if scanned % PROGRESS_INTERVAL == 0 {
                info!("Enumerated {} objects", scanned);
            }
        }

        debug!("Found {} tasks among {} objects", tasks.len(), scanned);
        tasks
    }

    /// Tasks held in local variables of some thread
    pub fn get_stack_tasks(&self) -> Vec<TaskInfo> {
        let runtime = self.driver.base().runtime();
        let items = self
            .driver
            .enumerate_stack_tasks()
            .into_iter()
            .filter_map(|address| match runtime.object_type(address) {
                Ok(ty) => Some(ObjectInfo { address, ty }),
                Err(e) => {
                    warn!("Stack task {:#x} can't be read: {}", address, e);
                    None
                }
            })
            .collect();
        self.resolve(items)
    }

    fn resolve(&self, items: Vec<ObjectInfo>) -> Vec<TaskInfo> {
        items
            .into_iter()
            .filter_map(|oi| self.resolve_one(oi))
            .collect()
    }

    fn resolve_one(&self, oi: ObjectInfo) -> Option<TaskInfo> {
        match self.driver.task_info(oi) {
            Ok(info) => info,
            Err(e) => {
                warn!("Work item {:#x} can't be resolved: {}", oi.address, e);
                None
            }
        }
    }
}

/// Write `count<TAB>method` lines, most frequent first
pub fn write_grouped_tasks<W: Write>(w: &mut W, tasks: &[TaskInfo]) -> io::Result<()> {
    write_grouped(
        w,
        tasks.iter().map(|t| t.method_name.clone().unwrap_or_default()),
    )
}

/// Display name for compiler-generated async state machine types
///
/// `MyApp.Service+<PollAsync>d__4` reads as `MyApp.Service.PollAsync`;
/// any other name is returned unchanged.
pub fn readable_type_name(name: &str) -> Cow<'_, str> {
    if let Some(open) = name.rfind("+<") {
        let rest = &name[open + 2..];
        if let Some(close) = rest.find(">d__") {
            let counter = &rest[close + 4..];
            if !counter.is_empty() && counter.chars().all(|c| c.is_ascii_digit()) {
                return Cow::Owned(format!("{}.{}", &name[..open], &rest[..close]));
            }
        }
    }
    Cow::Borrowed(name)
}
