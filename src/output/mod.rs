//! Output writers and readers.
//!
//! This module handles flat files on disk:
//! - Heap census rows (tab separated, appended per cycle)
//! - The stack interchange format (one JSON line per sample)

pub mod census;
pub mod stacks;

// Re-export main functions
pub use census::{census_file_path, format_census_rows, format_timestamp, write_census_file};
pub use stacks::{append_sample, parse_sample_line, read_chains, read_chains_file, write_sample};

use crate::utils::error::OutputError;
use log::debug;
use std::path::Path;

/// Check that `path` can be written, creating missing parent directories
fn prepare_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                OutputError::InvalidPath(format!(
                    "Cannot create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    Ok(())
}
