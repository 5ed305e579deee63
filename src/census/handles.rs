//! Handle census: which object types GC handles keep alive.

use super::write_grouped;
use crate::runtime::RuntimeProvider;
use log::warn;
use std::io::{self, Write};

/// Type name of each handle's target; empty for null or unreadable targets
pub fn handle_type_names(runtime: &dyn RuntimeProvider) -> Vec<String> {
    runtime
        .handles()
        .iter()
        .map(|handle| {
            if handle.object == 0 {
                return String::new();
            }
            match runtime.object_type_name(handle.object) {
                Ok(name) => name.unwrap_or_default().to_string(),
                Err(e) => {
                    warn!("Handle {:#x} target can't be read: {}", handle.address, e);
                    String::new()
                }
            }
        })
        .collect()
}

pub fn write_grouped_handles<W: Write>(w: &mut W, type_names: &[String]) -> io::Result<()> {
    writeln!(w, "Handles:\n")?;
    write_grouped(w, type_names.iter().cloned())
}
