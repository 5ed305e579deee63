//! Target resolution and attach.
//!
//! A target string names a process (PID or process name), a crash dump,
//! a core dump, or a heap snapshot file. Only heap snapshots are served by
//! this build; the other kinds are recognized and rejected with a clear
//! error so the caller can capture a snapshot instead.

use super::snapshot::{HeapSnapshot, SnapshotProvider};
use super::RuntimeProvider;
use crate::utils::config::DEFAULT_ATTACH_TIMEOUT;
use crate::utils::error::AttachError;
use log::{debug, info};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// What a target string refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Pid(u32),
    ProcessName(String),
    CrashDump(PathBuf),
    CoreDump(PathBuf),
    Snapshot(PathBuf),
}

impl Target {
    /// Classify a target string
    ///
    /// # Example
    /// ```
    /// use clr_census::runtime::Target;
    ///
    /// assert_eq!(Target::parse("1234"), Target::Pid(1234));
    /// assert!(matches!(Target::parse("app.DMP"), Target::CrashDump(_)));
    /// assert!(matches!(Target::parse("core.4711"), Target::CoreDump(_)));
    /// ```
    pub fn parse(target: &str) -> Self {
        let path = Path::new(target);
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase());
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();

        if extension.as_deref() == Some("dmp") {
            Target::CrashDump(path.to_path_buf())
        } else if extension.as_deref() == Some("json") {
            Target::Snapshot(path.to_path_buf())
        } else if file_name.starts_with("core.") {
            Target::CoreDump(path.to_path_buf())
        } else if let Ok(pid) = target.parse::<u32>() {
            Target::Pid(pid)
        } else {
            Target::ProcessName(target.to_string())
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Pid(_) | Target::ProcessName(_) => "live process",
            Target::CrashDump(_) => "crash dump",
            Target::CoreDump(_) => "core dump",
            Target::Snapshot(_) => "heap snapshot",
        }
    }
}

/// Attach to a target and return a runtime view of it
///
/// # Errors
/// * `AttachError::NotFound` - no such file, or no process matches
/// * `AttachError::Ambiguous` - a process name matches several processes
/// * `AttachError::NotManaged` - the target hosts no managed runtime
/// * `AttachError::Unsupported` - live processes and dumps need a native backend
pub fn attach(target: &Target) -> Result<Box<dyn RuntimeProvider>, AttachError> {
    match target {
        Target::Snapshot(path) => {
            let provider = load_snapshot(path)?;
            Ok(Box::new(provider))
        }
        Target::ProcessName(name) => {
            let pid = find_process_by_name(name)?;
            debug!("Process '{}' resolved to PID {}", name, pid);
            attach(&Target::Pid(pid))
        }
        Target::Pid(pid) => {
            if !process_exists(*pid) {
                return Err(AttachError::NotFound(pid.to_string()));
            }
            debug!(
                "Non-invasive attach to PID {} (timeout {:?})",
                pid, DEFAULT_ATTACH_TIMEOUT
            );
            Err(AttachError::Unsupported(target.kind()))
        }
        Target::CrashDump(path) | Target::CoreDump(path) => {
            if !path.exists() {
                return Err(AttachError::NotFound(path.display().to_string()));
            }
            Err(AttachError::Unsupported(target.kind()))
        }
    }
}

/// Load and index a heap snapshot file
pub fn load_snapshot(path: &Path) -> Result<SnapshotProvider, AttachError> {
    if !path.is_file() {
        return Err(AttachError::NotFound(path.display().to_string()));
    }

    info!("Loading heap snapshot: {}", path.display());
    let reader = BufReader::new(File::open(path)?);
    let snapshot: HeapSnapshot = serde_json::from_reader(reader)?;

    SnapshotProvider::new(snapshot).map_err(|e| match e {
        AttachError::NotManaged(_) => AttachError::NotManaged(path.display().to_string()),
        other => other,
    })
}

#[cfg(target_os = "linux")]
fn process_exists(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_exists(_pid: u32) -> bool {
    true
}

#[cfg(target_os = "linux")]
fn find_process_by_name(name: &str) -> Result<u32, AttachError> {
    let mut matches = Vec::new();
    for entry in std::fs::read_dir("/proc")?.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes may exit while we look; skip unreadable entries.
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            if comm.trim_end() == name {
                matches.push(pid);
            }
        }
    }

    match matches.as_slice() {
        [] => Err(AttachError::NotFound(name.to_string())),
        [pid] => Ok(*pid),
        _ => Err(AttachError::Ambiguous(name.to_string())),
    }
}

#[cfg(not(target_os = "linux"))]
fn find_process_by_name(name: &str) -> Result<u32, AttachError> {
    Err(AttachError::NotFound(name.to_string()))
}

/// Something the heap census can (re)attach to once per cycle
pub trait RuntimeSource: Send {
    fn open(&self) -> Result<Box<dyn RuntimeProvider>, AttachError>;
}

impl RuntimeSource for Target {
    fn open(&self) -> Result<Box<dyn RuntimeProvider>, AttachError> {
        attach(self)
    }
}

impl<F> RuntimeSource for F
where
    F: Fn() -> Result<Box<dyn RuntimeProvider>, AttachError> + Send,
{
    fn open(&self) -> Result<Box<dyn RuntimeProvider>, AttachError> {
        self()
    }
}
