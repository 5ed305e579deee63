//! Stack interchange format.
//!
//! One line per sample; each line is a JSON array of stacks, each stack an
//! array of frame names, outermost first:
//!
//! ```text
//! [["Program.Main","Worker.Run"],["Program.Main","Poller.Tick"]]
//! ```
//!
//! Reading back is lenient: blank lines and `null` arrays contribute
//! nothing, and a malformed line is logged and yields no chains.

use super::prepare_output_path;
use crate::utils::error::OutputError;
use log::{debug, warn};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Write one sample as a single JSON line
pub fn write_sample<W: Write, T: Display>(w: &mut W, stacks: &[Vec<T>]) -> Result<(), OutputError> {
    let names: Vec<Vec<String>> = stacks
        .iter()
        .map(|stack| stack.iter().map(ToString::to_string).collect())
        .collect();
    serde_json::to_writer(&mut *w, &names)?;
    w.write_all(b"\n")?;
    Ok(())
}

/// Append one sample line to a file, creating it if needed
pub fn append_sample<T: Display>(path: impl AsRef<Path>, stacks: &[Vec<T>]) -> Result<(), OutputError> {
    let path = path.as_ref();
    prepare_output_path(path)?;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    write_sample(&mut writer, stacks)?;
    writer.flush()?;

    debug!("Recorded {} stacks to {}", stacks.len(), path.display());
    Ok(())
}

/// Chains of one line; never fails
pub fn parse_sample_line(line: &str) -> Vec<Vec<String>> {
    let line = line.trim();
    if line.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Option<Vec<Option<Vec<String>>>>>(line) {
        Ok(stacks) => stacks.unwrap_or_default().into_iter().flatten().collect(),
        Err(e) => {
            warn!("Skipping malformed stack sample: {}", e);
            Vec::new()
        }
    }
}

/// Chains of every line of a stream
pub fn read_chains<R: BufRead>(reader: R) -> Result<Vec<Vec<String>>, OutputError> {
    let mut chains = Vec::new();
    for line in reader.lines() {
        chains.extend(parse_sample_line(&line?));
    }
    Ok(chains)
}

pub fn read_chains_file(path: impl AsRef<Path>) -> Result<Vec<Vec<String>>, OutputError> {
    let path = path.as_ref();
    debug!("Reading stack samples from: {}", path.display());
    read_chains(BufReader::new(File::open(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chains(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|chain| chain.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_write_sample_is_one_line() {
        let mut out = Vec::new();
        write_sample(&mut out, &chains(&[&["Main", "Run"], &["Main"]])).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "[[\"Main\",\"Run\"],[\"Main\"]]\n");
    }

    #[test]
    fn test_read_tolerates_blank_and_null() {
        let input = "\n[[\"A\",\"B\"],null]\nnull\n   \n[[\"C\"]]\n";
        let read = read_chains(input.as_bytes()).unwrap();
        assert_eq!(read, chains(&[&["A", "B"], &["C"]]));
    }

    #[test]
    fn test_malformed_line_yields_nothing() {
        assert!(parse_sample_line("[[\"A\",").is_empty());
        assert!(parse_sample_line("{\"not\": \"stacks\"}").is_empty());

        let input = "[[\"A\"]]\nnot json\n[[\"B\"]]\n";
        assert_eq!(read_chains(input.as_bytes()).unwrap(), chains(&[&["A"], &["B"]]));
    }

    #[test]
    fn test_append_sample_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("samples/stacks.jsonl");
        let first = chains(&[&["Main", "Worker.Run"], &["Main", "Poller.Tick"]]);
        let second = chains(&[&["Main", "Worker.Run"]]);

        append_sample(&path, &first).unwrap();
        append_sample(&path, &second).unwrap();

        let mut expected = first;
        expected.extend(second);
        assert_eq!(read_chains_file(&path).unwrap(), expected);
    }
}
