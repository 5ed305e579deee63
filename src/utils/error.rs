//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use crate::runtime::Address;
use thiserror::Error;

/// Errors raised while reading the inspected runtime
///
/// A live, mutating process can expose torn or unmapped pages, so callers
/// scanning many objects treat these as per-object failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Address {0:#x} is not a known object")]
    UnknownAddress(Address),

    #[error("Object at {address:#x} has no field '{field}'")]
    MissingField { address: Address, field: String },

    #[error("Object at {0:#x} is not an array")]
    NotAnArray(Address),

    #[error("Index {index} out of range for array at {address:#x} (length {length})")]
    IndexOutOfRange {
        address: Address,
        index: usize,
        length: usize,
    },

    #[error("Field '{field}' at {address:#x} does not hold {expected}")]
    UnexpectedValue {
        address: Address,
        field: String,
        expected: &'static str,
    },

    #[error("Type '{0}' has no static field '{1}'")]
    MissingStatic(String, String),
}

/// Errors that can occur while attaching to a target
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("Target '{0}' not found")]
    NotFound(String),

    #[error("Target '{0}' matches more than one process")]
    Ambiguous(String),

    #[error("Target '{0}' does not host a recognized managed runtime")]
    NotManaged(String),

    #[error("Attaching to a {0} is not supported by this build; capture a heap snapshot instead")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid heap snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while preparing a version-specific driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Impossible to find the core library (mscorlib.dll / System.Private.CoreLib)")]
    MissingCorlib,

    #[error("Runtime type '{0}' not found")]
    MissingType(&'static str),

    #[error(transparent)]
    Read(#[from] ProviderError),
}

/// Errors in heap census configuration (schedule, generations)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid schedule expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Can't parse generation '{0}' (expected gen0..gen3)")]
    InvalidGeneration(String),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Empty stack data")]
    EmptyStacks,

    #[error("Failed to render flamegraph: {0}")]
    RenderFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}
