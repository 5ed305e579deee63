//! Version-specific discovery of pending work.
//!
//! The thread pool's queues and the timer queue are internal runtime data
//! structures whose layout differs between runtime flavors. [`ClrDriver`]
//! is selected once per attached runtime and walks the right layout; the
//! resolution of a work item to a method name is shared by both flavors.
//!
//! # Example
//! ```ignore
//! let driver = ClrDriver::new(runtime.as_ref(), DriverOptions::default())?;
//! for item in driver.enumerate_managed_work_items()? {
//!     if let Some(task) = driver.task_info(item)? {
//!         println!("{:?}", task.method_name);
//!     }
//! }
//! ```

mod netcore;
mod netfx;

pub use netcore::NetCoreDriver;
pub use netfx::NetFrameworkDriver;

use crate::runtime::{Address, ClrFlavor, RootKind, RuntimeProvider, TypeHandle};
use crate::utils::config::*;
use crate::utils::error::{DriverError, ProviderError};
use log::{debug, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A heap object together with its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub address: Address,
    pub ty: TypeHandle,
}

/// A resolved unit of work
///
/// `method_name` is `None` when the delegate's code could not be mapped to
/// a method. The `[no action]` / `[no target]` markers are regular names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub address: Address,
    pub method_name: Option<String>,
}

/// What to yield for a delay wrapper whose inner state machine is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullInnerStatePolicy {
    /// Yield the wrapper object itself
    #[default]
    YieldWrapper,
    /// Yield nothing for this timer
    Skip,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverOptions {
    pub null_inner_state: NullInnerStatePolicy,
}

/// State and name resolution shared by every flavor
pub struct DriverBase<'a> {
    runtime: &'a dyn RuntimeProvider,
    options: DriverOptions,
    type_object: TypeHandle,
    type_task: TypeHandle,
    type_delegate: TypeHandle,
    task_by_type: HashMap<TypeHandle, bool>,
}

impl<'a> DriverBase<'a> {
    fn new(runtime: &'a dyn RuntimeProvider, options: DriverOptions) -> Result<Self, DriverError> {
        let has_corelib = runtime.modules().iter().any(|m| {
            let name = m.assembly_name.to_lowercase();
            CORELIB_MARKERS.iter().any(|marker| name.contains(marker))
        });
        if !has_corelib {
            return Err(DriverError::MissingCorlib);
        }

        let lookup = |name: &'static str| {
            runtime
                .type_by_name(name)
                .ok_or(DriverError::MissingType(name))
        };

        let type_object = lookup(OBJECT_TYPE)?;
        let type_delegate = lookup(DELEGATE_TYPE)?;
        let mut type_task = lookup(TASK_TYPE)?;
        // The name may resolve to an instantiation of Task<T>; use the
        // non-generic base in that case.
        if let Some(base) = runtime.base_type(type_task) {
            if runtime.type_name(base) == Some(TASK_TYPE) {
                type_task = base;
            }
        }

        Ok(Self {
            runtime,
            options,
            type_object,
            type_task,
            type_delegate,
            task_by_type: HashMap::new(),
        })
    }

    pub fn runtime(&self) -> &'a dyn RuntimeProvider {
        self.runtime
    }

    /// Whether `ty` derives from the task type, memoized per type
    pub fn is_task_descendant(&mut self, ty: TypeHandle) -> bool {
        if let Some(&known) = self.task_by_type.get(&ty) {
            return known;
        }
        let result = ty != self.type_object
            && (ty == self.type_task
                || self
                    .runtime
                    .base_type(ty)
                    .is_some_and(|base| self.is_task_descendant(base)));
        self.task_by_type.insert(ty, result);
        result
    }

    pub fn is_delegate_descendant(&self, ty: TypeHandle) -> bool {
        ty != self.type_object
            && (ty == self.type_delegate
                || self
                    .runtime
                    .base_type(ty)
                    .is_some_and(|base| self.is_delegate_descendant(base)))
    }

    /// Read an object reference that older or newer layouts may lack
    fn read_optional(&self, address: Address, field: &str) -> Result<Address, ProviderError> {
        match self.runtime.read_address(address, field) {
            Err(ProviderError::MissingField { .. }) => Ok(0),
            other => other,
        }
    }

    fn read_first_of(&self, address: Address, fields: &[&str]) -> Result<Address, ProviderError> {
        for field in fields {
            match self.runtime.read_address(address, field) {
                Err(ProviderError::MissingField { .. }) => continue,
                other => return other,
            }
        }
        Ok(0)
    }

    fn task_action(&self, task: Address) -> Result<Address, ProviderError> {
        let action = self.read_optional(task, "m_action")?;
        if action != 0 {
            return Ok(action);
        }
        let continuation = self.read_optional(task, "m_continuationObject")?;
        if continuation != 0 && self.is_delegate_descendant(self.runtime.object_type(continuation)?) {
            return Ok(continuation);
        }
        Ok(0)
    }

    fn delegate_method_name(&self, target_type_name: &str, action: Address) -> Result<Option<String>, ProviderError> {
        let method_ptr = self.runtime.read_address(action, "_methodPtr")?;
        if method_ptr == 0 {
            return Ok(None);
        }

        let method = match self.runtime.method_by_address(method_ptr) {
            Some(method) => method,
            // static methods are reached through the auxiliary pointer
            None => {
                let aux = self.read_optional(action, "_methodPtrAux")?;
                match self.runtime.method_by_address(aux) {
                    Some(method) => method,
                    None => return Ok(None),
                }
            }
        };

        let indirect = method.type_name != target_type_name
            && target_type_name != WAIT_CALLBACK_TYPE
            && !target_type_name.starts_with(ACTION_TYPE_PREFIX);
        let prefix = if indirect {
            format!("({})", target_type_name)
        } else {
            String::new()
        };
        Ok(Some(format!("{}{}.{}", prefix, method.type_name, method.name)))
    }

    fn method_name_from_delegate(&self, action: Address, task: Option<Address>) -> Result<Option<String>, ProviderError> {
        if action == 0 {
            return Ok(Some(NO_ACTION.to_string()));
        }
        let target = self.runtime.read_address(action, "_target")?;
        if target == 0 {
            return Ok(Some(NO_TARGET.to_string()));
        }

        let target_type_name = self.runtime.object_type_name(target)?.unwrap_or_default();
        let Some(name) = self.delegate_method_name(target_type_name, action)? else {
            return Ok(None);
        };

        if name == MOVE_NEXT_RUNNER_RUN {
            let state_machine = self.read_optional(target, "m_stateMachine")?;
            if state_machine != 0 {
                if let Some(sm_name) = self.runtime.object_type_name(state_machine)? {
                    return Ok(Some(sm_name.to_string()));
                }
            }
            return Ok(Some(name));
        }

        if let Some(task) = task {
            let scheduler = self.read_optional(task, "m_taskScheduler")?;
            if scheduler != 0 {
                if let Some(scheduler_name) = self.runtime.object_type_name(scheduler)? {
                    if scheduler_name != DEFAULT_SCHEDULER_TYPE {
                        return Ok(Some(format!("{} [{}]", name, scheduler_name)));
                    }
                }
            }
        }
        Ok(Some(name))
    }

    fn task(&self, task: Address) -> Result<Option<TaskInfo>, ProviderError> {
        let action = self.task_action(task)?;
        if action == 0 {
            return Ok(None);
        }
        Ok(Some(TaskInfo {
            address: task,
            method_name: self.method_name_from_delegate(action, Some(task))?,
        }))
    }

    fn queue_user_work_item(&self, item: Address) -> Result<TaskInfo, ProviderError> {
        let callback = self.read_first_of(item, &["callback", "_callback"])?;
        Ok(TaskInfo {
            address: item,
            method_name: self.method_name_from_delegate(callback, None)?,
        })
    }

    /// Resolve a work item, timer state or task object to a unit of work
    ///
    /// Returns `Ok(None)` for tasks that carry no delegate at all.
    pub fn task_info(&self, oi: ObjectInfo) -> Result<Option<TaskInfo>, ProviderError> {
        let type_name = self.runtime.type_name(oi.ty).unwrap_or_default();
        match type_name {
            TASK_TYPE | DELAY_PROMISE_TYPE => self.task(oi.address),
            QUEUE_USER_WORK_ITEM_TYPE | QUEUE_USER_WORK_ITEM_DEFAULT_CONTEXT_TYPE => {
                self.queue_user_work_item(oi.address).map(Some)
            }
            name if name.starts_with(GENERIC_TASK_PREFIX) => self.task(oi.address),
            name => Ok(Some(TaskInfo {
                address: oi.address,
                method_name: Some(name.to_string()),
            })),
        }
    }

    /// Replace a delay wrapper timer state by the state machine it resumes
    fn unwrap_timer_state(&self, state: Address) -> Result<Option<Address>, ProviderError> {
        if self.runtime.object_type_name(state)? != Some(DELAY_PROMISE_TYPE) {
            return Ok(Some(state));
        }
        match self.state_machine_behind(state)? {
            Some(state_machine) => Ok(Some(state_machine)),
            None => match self.options.null_inner_state {
                NullInnerStatePolicy::YieldWrapper => Ok(Some(state)),
                NullInnerStatePolicy::Skip => Ok(None),
            },
        }
    }

    /// continuation -> delegate target -> async state machine
    fn state_machine_behind(&self, wrapper: Address) -> Result<Option<Address>, ProviderError> {
        let continuation = self.read_optional(wrapper, "m_continuationObject")?;
        if continuation == 0 || !self.is_delegate_descendant(self.runtime.object_type(continuation)?) {
            return Ok(None);
        }
        let target = self.read_optional(continuation, "_target")?;
        if target == 0 {
            return Ok(None);
        }
        let state_machine = self.read_optional(target, "m_stateMachine")?;
        Ok((state_machine != 0).then_some(state_machine))
    }

    /// Walk a timer linked list, yielding (unwrapped) non-null states
    fn collect_timer_states(
        &self,
        first: Address,
        next_field: &str,
        state_field: &str,
        states: &mut Vec<Address>,
    ) -> Result<(), ProviderError> {
        let mut seen = HashSet::new();
        let mut timer = first;
        while timer != 0 && seen.insert(timer) {
            let state = self.runtime.read_address(timer, state_field)?;
            if state != 0 {
                if let Some(state) = self.unwrap_timer_state(state)? {
                    states.push(state);
                }
            }
            timer = self.runtime.read_address(timer, next_field)?;
        }
        Ok(())
    }

    /// Items of every per-thread work-stealing queue in `queues` (an array
    /// that may contain empty slots)
    fn collect_work_stealing_queues(&self, queues: Address, items: &mut Vec<Address>) -> Result<(), ProviderError> {
        if queues == 0 {
            return Ok(());
        }
        let rt = self.runtime;
        for i in 0..rt.array_length(queues)? {
            let queue = rt.array_element(queues, i)?.as_address();
            if queue == 0 {
                continue;
            }
            let nodes = rt.read_address(queue, "m_array")?;
            if nodes == 0 {
                continue;
            }
            for j in 0..rt.array_length(nodes)? {
                let node = rt.array_element(nodes, j)?.as_address();
                if node != 0 {
                    items.push(node);
                }
            }
        }
        Ok(())
    }
}

/// Flavor-specific driver, selected once per attached runtime
pub enum ClrDriver<'a> {
    Core(NetCoreDriver<'a>),
    Framework(NetFrameworkDriver<'a>),
}

impl<'a> ClrDriver<'a> {
    /// Create the driver matching the runtime's flavor
    ///
    /// # Errors
    /// * `DriverError::MissingCorlib` - no core library module loaded
    /// * `DriverError::MissingType` - a well-known runtime type is absent
    pub fn new(runtime: &'a dyn RuntimeProvider, options: DriverOptions) -> Result<Self, DriverError> {
        let base = DriverBase::new(runtime, options)?;
        let driver = match runtime.flavor() {
            ClrFlavor::Core => ClrDriver::Core(NetCoreDriver { base }),
            ClrFlavor::Desktop => ClrDriver::Framework(NetFrameworkDriver { base }),
        };
        debug!("Selected {:?} driver", runtime.flavor());
        Ok(driver)
    }

    pub fn base(&self) -> &DriverBase<'a> {
        match self {
            ClrDriver::Core(d) => &d.base,
            ClrDriver::Framework(d) => &d.base,
        }
    }

    fn base_mut(&mut self) -> &mut DriverBase<'a> {
        match self {
            ClrDriver::Core(d) => &mut d.base,
            ClrDriver::Framework(d) => &mut d.base,
        }
    }

    /// Work items queued in the thread pool, not yet picked up
    pub fn enumerate_managed_work_items(&self) -> Result<Vec<ObjectInfo>, DriverError> {
        let rt = self.base().runtime;
        let Some(globals) = rt.type_by_name(THREAD_POOL_GLOBALS_TYPE) else {
            debug!("{} not loaded; no managed work items", THREAD_POOL_GLOBALS_TYPE);
            return Ok(Vec::new());
        };
        let work_queue = rt
            .static_field(globals, "workQueue")?
            .map(|v| v.as_address())
            .unwrap_or(0);
        if work_queue == 0 {
            return Ok(Vec::new());
        }
        if rt.object_type_name(work_queue)? != Some(THREAD_POOL_WORK_QUEUE_TYPE) {
            warn!("Unexpected thread pool work queue type at {:#x}", work_queue);
            return Ok(Vec::new());
        }

        let items = match self {
            ClrDriver::Core(d) => d.enumerate_work_queue(work_queue)?,
            ClrDriver::Framework(d) => d.enumerate_work_queue(work_queue)?,
        };
        debug!("Found {} queued work items", items.len());
        Ok(self.with_types(items))
    }

    /// States of pending timer callbacks
    pub fn enumerate_timer_tasks(&self) -> Result<Vec<ObjectInfo>, DriverError> {
        let states = match self {
            ClrDriver::Core(d) => d.enumerate_timer_states()?,
            ClrDriver::Framework(d) => d.enumerate_timer_states()?,
        };
        debug!("Found {} timer states", states.len());
        Ok(self.with_types(states))
    }

    /// Task objects referenced from thread stacks as locals
    pub fn enumerate_stack_tasks(&self) -> Vec<Address> {
        let rt = self.base().runtime;
        let mut seen = HashSet::new();
        let mut tasks = Vec::new();

        for thread in rt.threads() {
            for root in thread.roots.iter().filter(|r| r.kind == RootKind::LocalVar) {
                if root.object == 0 || !seen.insert(root.object) {
                    continue;
                }
                match rt.object_type_name(root.object) {
                    Ok(Some(name)) if name.contains(TASK_TYPE) => tasks.push(root.object),
                    Ok(_) => {}
                    Err(e) => warn!("Stack root {:#x} can't be read: {}", root.object, e),
                }
            }
        }
        tasks
    }

    pub fn task_info(&self, oi: ObjectInfo) -> Result<Option<TaskInfo>, ProviderError> {
        self.base().task_info(oi)
    }

    pub fn is_task_descendant(&mut self, ty: TypeHandle) -> bool {
        self.base_mut().is_task_descendant(ty)
    }

    pub fn is_delegate_descendant(&self, ty: TypeHandle) -> bool {
        self.base().is_delegate_descendant(ty)
    }

    fn with_types(&self, addresses: Vec<Address>) -> Vec<ObjectInfo> {
        let rt = self.base().runtime;
        addresses
            .into_iter()
            .filter(|&a| a != 0)
            .filter_map(|address| match rt.object_type(address) {
                Ok(ty) => Some(ObjectInfo { address, ty }),
                Err(e) => {
                    warn!("Work item {:#x} can't be read: {}", address, e);
                    None
                }
            })
            .collect()
    }
}
