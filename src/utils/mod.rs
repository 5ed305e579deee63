//! Utility modules for configuration and error handling.

pub mod config;
pub mod error;

// Re-export commonly used error types for convenience
pub use error::{AttachError, DriverError, FlamegraphError, OutputError, ProviderError, ConfigError};
