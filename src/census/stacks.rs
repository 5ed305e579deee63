//! Call-stack census: one chain of frames per thread.

use crate::runtime::{FrameInfo, RuntimeProvider};
use std::cell::OnceCell;
use std::fmt;

/// A stack frame whose display name is computed once, on first use
///
/// Merging compares frames by name many times over, so the name is cached.
#[derive(Debug, Clone)]
pub struct Frame {
    info: FrameInfo,
    name: OnceCell<String>,
}

impl Frame {
    pub fn new(info: FrameInfo) -> Self {
        Self {
            info,
            name: OnceCell::new(),
        }
    }

    pub fn info(&self) -> &FrameInfo {
        &self.info
    }

    /// `ShortType.Method` for managed frames, the runtime's text otherwise
    pub fn name(&self) -> &str {
        self.name.get_or_init(|| match &self.info.method {
            Some(method) => format!("{}.{}", short_type_name(&method.type_name), method.name),
            None => self.info.text.clone(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type name without its namespace; generic arguments are kept whole
fn short_type_name(type_name: &str) -> &str {
    let generic_start = type_name.find('<').unwrap_or(type_name.len());
    match type_name[..generic_start].rfind('.') {
        Some(dot) => &type_name[dot + 1..],
        None => type_name,
    }
}

/// Every thread's stack, outermost caller first; empty stacks are skipped
pub fn get_stack_traces(runtime: &dyn RuntimeProvider) -> Vec<Vec<Frame>> {
    runtime
        .threads()
        .into_iter()
        .map(|thread| thread.frames.into_iter().rev().map(Frame::new).collect::<Vec<_>>())
        .filter(|frames| !frames.is_empty())
        .collect()
}
