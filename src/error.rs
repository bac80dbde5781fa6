//! Error handling module for archstrap
//!
//! Provides a single error type for the execution and disk layout layers.
//! Orchestration code (config loading, provisioning) wraps these in `anyhow`.

use thiserror::Error;

/// Main error type for the command execution and disk layout layers
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// An external command exited with a non-zero status
    #[error("Command failed (exit code {code}): {command}{}", stderr_suffix(.stderr))]
    CommandFailure {
        /// Full rendered command line, pipes and redirects included
        command: String,
        /// Argument vector of the stage whose status was checked
        argv: Vec<String>,
        /// Exit code, -1 when terminated by a signal
        code: i32,
        /// Captured standard error of the checked stage
        stderr: String,
    },

    /// The program could not be started at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// IO errors (redirect targets, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tool output did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// A required field is absent from the partitioning tool's listing
    #[error("Partition table listing does not contain '{field}'")]
    MissingField { field: &'static str },

    #[error("Partition {number} was not found on {device}")]
    PartitionNotFound { number: u32, device: String },

    #[error("Partition type '{value}' was not recognized, possible values are {}", .valid.join(", "))]
    UnknownPartitionType {
        value: String,
        valid: Vec<&'static str>,
    },

    /// The requested layout does not fit into the remaining sectors
    #[error("Requested offset is higher than disk capacity: {end} >= {total}")]
    CapacityExceeded { end: u64, total: u64 },

    /// Caller supplied an unusable value
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for the execution and disk layout layers
pub type Result<T> = std::result::Result<T, ProvisionError>;

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

impl ProvisionError {
    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Exit code of a failed command, if this is a command failure
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandFailure { code, .. } => Some(*code),
            _ => None,
        }
    }
}
