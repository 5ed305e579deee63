//! Queue layouts of the .NET Framework runtime.

use super::DriverBase;
use crate::runtime::Address;
use crate::utils::config::TIMER_QUEUE_TYPE;
use crate::utils::error::ProviderError;
use log::debug;
use std::collections::HashSet;

pub struct NetFrameworkDriver<'a> {
    pub(super) base: DriverBase<'a>,
}

impl<'a> NetFrameworkDriver<'a> {
    /// Global queue segments (tail first), then the thread-local queues
    pub(super) fn enumerate_work_queue(&self, work_queue: Address) -> Result<Vec<Address>, ProviderError> {
        let rt = self.base.runtime;
        let mut items = Vec::new();
        let mut seen = HashSet::new();

        let mut segment = rt.read_address(work_queue, "queueTail")?;
        while segment != 0 && seen.insert(segment) {
            // lower bound in the low 16 bits, upper bound in the high 16
            let indexes = rt.read_int(segment, "indexes")?;
            let lower = (indexes & 0xFFFF) as usize;
            let upper = ((indexes >> 16) & 0xFFFF) as usize;

            let nodes = rt.read_address(segment, "nodes")?;
            let length = rt.array_length(nodes)?;
            for i in lower..upper.min(length) {
                let node = rt.array_element(nodes, i)?.as_address();
                if node != 0 {
                    items.push(node);
                }
            }
            segment = rt.read_address(segment, "Next")?;
        }

        let queue_type = rt.object_type(work_queue)?;
        match rt.static_field(queue_type, "allThreadQueues")? {
            Some(value) if value.as_address() != 0 => {
                let queues = rt.read_address(value.as_address(), "m_array")?;
                self.base.collect_work_stealing_queues(queues, &mut items)?;
            }
            _ => debug!("No thread-local work queues"),
        }
        Ok(items)
    }

    pub(super) fn enumerate_timer_states(&self) -> Result<Vec<Address>, ProviderError> {
        let rt = self.base.runtime;
        let Some(timer_queue) = rt.type_by_name(TIMER_QUEUE_TYPE) else {
            return Ok(Vec::new());
        };
        let queue = match rt.static_field(timer_queue, "s_queue")? {
            Some(value) => value.as_address(),
            None => return Ok(Vec::new()),
        };
        if queue == 0 {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        let first = rt.read_address(queue, "m_timers")?;
        self.base.collect_timer_states(first, "m_next", "m_state", &mut states)?;
        Ok(states)
    }
}
