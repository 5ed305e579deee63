//! Heap census output file.
//!
//! Each cycle appends one row per (type, generation) key:
//! `timestamp<TAB>type<TAB>generation<TAB>count<CRLF>`, largest counts
//! first. The file name comes from a template whose `{DateTime}`
//! placeholder is replaced by the cycle timestamp.

use super::prepare_output_path;
use crate::aggregator::Histogram;
use crate::utils::config::DATETIME_PLACEHOLDER;
use crate::utils::error::OutputError;
use chrono::{DateTime, Local};
use log::{debug, info};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Sortable ISO 8601 timestamp, second precision, no offset
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn format_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Resolve the output file template for one cycle
///
/// Characters that are invalid in file names on common platforms are
/// replaced by `_` in the substituted timestamp.
pub fn census_file_path(template: &str, timestamp: &DateTime<Local>) -> PathBuf {
    let stamp: String = format_timestamp(timestamp)
        .chars()
        .map(|c| if is_invalid_file_name_char(c) { '_' } else { c })
        .collect();
    PathBuf::from(template.replace(DATETIME_PLACEHOLDER, &stamp))
}

fn is_invalid_file_name_char(c: char) -> bool {
    c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
}

/// Rows for one cycle, largest count first (ties by type, then generation)
pub fn format_census_rows(histogram: &Histogram, timestamp: &DateTime<Local>) -> String {
    let stamp = format_timestamp(timestamp);

    let mut rows: Vec<_> = histogram.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut out = String::new();
    for (key, count) in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\r\n",
            stamp, key.type_name, key.generation, count
        ));
    }
    out
}

/// Append one cycle's rows to the file named by `template`
///
/// Returns the path written to.
///
/// # Errors
/// * `OutputError::InvalidPath` - the path is empty, a directory, or its
///   parent cannot be created
/// * `OutputError::WriteFailed` - I/O error while appending
pub fn write_census_file(
    template: &str,
    timestamp: &DateTime<Local>,
    histogram: &Histogram,
) -> Result<PathBuf, OutputError> {
    let path = census_file_path(template, timestamp);
    append_rows(&path, &format_census_rows(histogram, timestamp))?;
    info!("Wrote {} census rows to: {}", histogram.len(), path.display());
    Ok(path)
}

fn append_rows(path: &Path, rows: &str) -> Result<(), OutputError> {
    prepare_output_path(path)?;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(rows.as_bytes())?;
    writer.flush()?;

    debug!("Appended {} bytes to {}", rows.len(), path.display());
    Ok(())
}
