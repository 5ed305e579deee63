//! Queue layouts of .NET Core and later runtimes.

use super::DriverBase;
use crate::runtime::{Address, RuntimeProvider};
use crate::utils::config::{TIMER_QUEUE_TYPE, WORK_STEALING_QUEUE_LIST_TYPE};
use crate::utils::error::ProviderError;
use std::collections::HashSet;

pub struct NetCoreDriver<'a> {
    pub(super) base: DriverBase<'a>,
}

impl<'a> NetCoreDriver<'a> {
    /// Global queue items followed by the per-thread work-stealing queues
    pub(super) fn enumerate_work_queue(&self, work_queue: Address) -> Result<Vec<Address>, ProviderError> {
        let rt = self.base.runtime;
        let queue = rt.read_address(work_queue, "workItems")?;

        let mut items = Vec::new();
        if queue != 0 {
            collect_concurrent_queue(rt, queue, &mut items)?;
        }

        if let Some(list) = rt.type_by_name(WORK_STEALING_QUEUE_LIST_TYPE) {
            if let Some(queues) = rt.static_field(list, "_queues")? {
                self.base.collect_work_stealing_queues(queues.as_address(), &mut items)?;
            }
        }
        Ok(items)
    }

    /// Timer states across every timer queue instance, short list first
    pub(super) fn enumerate_timer_states(&self) -> Result<Vec<Address>, ProviderError> {
        let rt = self.base.runtime;
        let Some(timer_queue) = rt.type_by_name(TIMER_QUEUE_TYPE) else {
            return Ok(Vec::new());
        };
        let instances = match rt.static_field(timer_queue, "<Instances>k__BackingField")? {
            Some(value) => value.as_address(),
            None => return Ok(Vec::new()),
        };
        if instances == 0 {
            return Ok(Vec::new());
        }

        let mut states = Vec::new();
        for i in 0..rt.array_length(instances)? {
            let queue = rt.array_element(instances, i)?.as_address();
            if queue == 0 {
                continue;
            }
            for list in ["_shortTimers", "_longTimers"] {
                let first = self.base.read_optional(queue, list)?;
                self.base.collect_timer_states(first, "_next", "_state", &mut states)?;
            }
        }
        Ok(states)
    }
}

/// Walk the segments of a lock-free concurrent queue from head to tail
fn collect_concurrent_queue(
    rt: &dyn RuntimeProvider,
    queue: Address,
    items: &mut Vec<Address>,
) -> Result<(), ProviderError> {
    let tail_segment = rt.read_address(queue, "_tail")?;
    let mut segment = rt.read_address(queue, "_head")?;
    let mut seen = HashSet::new();

    while segment != 0 && seen.insert(segment) {
        let slots = rt.read_address(segment, "_slots")?;
        let length = rt.array_length(slots)?;
        let mask = rt.read_int(segment, "_slotsMask")?;

        let head_and_tail = rt.read_address(segment, "_headAndTail")?;
        let head = read_interior_int(rt, head_and_tail, "Head")?;
        let tail = read_interior_int(rt, head_and_tail, "Tail")?;

        // Bounded by the slot count: head/tail may be torn in a live read.
        let mut position = head;
        let mut visited = 0;
        while position != tail && visited < length {
            let slot = rt.array_element_address(slots, slot_index(position, mask, length))?;
            let item = rt.read_interior_field(slot, "Item")?.as_address();
            if item != 0 {
                items.push(item);
            }
            position = position.wrapping_add(1);
            visited += 1;
        }

        if segment == tail_segment {
            break;
        }
        segment = rt.read_address(segment, "_nextSegment")?;
    }
    Ok(())
}

fn read_interior_int(rt: &dyn RuntimeProvider, address: Address, field: &str) -> Result<i64, ProviderError> {
    rt.read_interior_field(address, field)?
        .as_int()
        .ok_or_else(|| ProviderError::UnexpectedValue {
            address,
            field: field.to_string(),
            expected: "an integer",
        })
}

fn slot_index(position: i64, mask: i64, length: usize) -> usize {
    if mask > 0 {
        (position & mask) as usize
    } else {
        position.rem_euclid(length as i64) as usize
    }
}
