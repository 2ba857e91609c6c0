//! Error types for NatNet protocol processing.
//!
//! Every fallible operation in the crate returns [`NatNetError`]. Variants carry
//! structured context (offsets, byte counts, command text) so malformed packets
//! and transport failures can be diagnosed from a log line alone.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: truncated buffers, inconsistent counts, unknown description tags
//! - **Transport Errors**: socket bind, multicast join, send and receive failures
//! - **Command Errors**: commands that exhausted their retry budget, rejected
//!   bitstream version changes
//! - **Configuration Errors**: invalid addresses, locked settings, unreadable config files
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use natnet::NatNetError;
//!
//! let error = NatNetError::command_failed("TimelinePlay", 3);
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::Version;

/// Result type alias for NatNet operations.
pub type Result<T, E = NatNetError> = std::result::Result<T, E>;

/// Main error type for NatNet operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NatNetError {
    #[error("Truncated {context}: need {needed} bytes at offset {offset}, have {available}")]
    Truncated { context: String, offset: usize, needed: usize, available: usize },

    #[error("Malformed packet in {context} at offset {offset}: {details}")]
    Malformed { context: String, offset: usize, details: String },

    #[error("Unknown description type {tag} at entry {index} (offset {offset})")]
    UnknownDescriptionType { tag: u32, index: usize, offset: usize },

    #[error("Transport error during {operation}")]
    Transport {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Command '{command}' failed after {attempts} attempt(s)")]
    CommandFailed {
        command: String,
        attempts: u32,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Bitstream change to {requested} rejected: {reason}")]
    VersionChangeRejected { requested: Version, reason: String },

    #[error("Cannot change {setting} after the client has been started")]
    ConfigurationLocked { setting: String },

    #[error("Invalid configuration for {field}: {details}")]
    InvalidConfig { field: String, details: String },

    #[error("Config file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Cannot {operation} while client is {state}")]
    Lifecycle { operation: String, state: String },
}

impl NatNetError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            NatNetError::Transport { .. } => true,
            NatNetError::Timeout { .. } => true,
            NatNetError::CommandFailed { .. } => true,
            NatNetError::Truncated { .. } => false,
            NatNetError::Malformed { .. } => false,
            NatNetError::UnknownDescriptionType { .. } => false,
            NatNetError::VersionChangeRejected { .. } => false,
            NatNetError::ConfigurationLocked { .. } => false,
            NatNetError::InvalidConfig { .. } => false,
            NatNetError::File { .. } => false,
            NatNetError::Parse { .. } => false,
            NatNetError::Lifecycle { .. } => false,
        }
    }

    /// Returns whether this error describes a packet that could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            NatNetError::Truncated { .. }
                | NatNetError::Malformed { .. }
                | NatNetError::UnknownDescriptionType { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            NatNetError::Truncated { .. } | NatNetError::Malformed { .. } => vec![
                "Check that the client and server agree on the bitstream version",
                "Request model definitions again after a version change",
                "Capture the packet for offline inspection",
            ],
            NatNetError::UnknownDescriptionType { .. } => vec![
                "Update the client to a release that knows the description type",
                "Lower the server bitstream version",
            ],
            NatNetError::Transport { .. } => vec![
                "Verify the local interface address exists on this host",
                "Check that the server streaming mode matches the transport mode",
                "Ensure no firewall blocks ports 1510 and 1511",
            ],
            NatNetError::Timeout { .. } => vec![
                "Verify the server is streaming",
                "Check network connectivity to the server",
            ],
            NatNetError::CommandFailed { .. } => vec![
                "Check the server address and command port",
                "Retry the command",
            ],
            NatNetError::VersionChangeRejected { .. } => vec![
                "Use unicast transport with a server advertising stream version 4 or newer",
                "Request a version different from the active one",
            ],
            NatNetError::ConfigurationLocked { .. } => vec![
                "Apply configuration before calling run()",
                "Create a new client with the desired configuration",
            ],
            NatNetError::InvalidConfig { .. } => vec![
                "Use dotted IPv4 addresses",
                "Use a multicast group in 224.0.0.0/4",
            ],
            NatNetError::File { .. } => vec![
                "Check the config file exists and is readable",
                "Check file permissions",
            ],
            NatNetError::Parse { .. } => vec![
                "Check the config file is valid YAML",
                "Compare field names against ClientConfig",
            ],
            NatNetError::Lifecycle { .. } => vec![
                "Call run() before issuing commands",
                "Create a new client after shutdown()",
            ],
        }
    }

    /// Helper constructor for buffer underruns.
    pub fn truncated(
        context: impl Into<String>,
        offset: usize,
        needed: usize,
        available: usize,
    ) -> Self {
        NatNetError::Truncated { context: context.into(), offset, needed, available }
    }

    /// Helper constructor for structurally invalid packets.
    pub fn malformed(context: impl Into<String>, offset: usize, details: impl Into<String>) -> Self {
        NatNetError::Malformed { context: context.into(), offset, details: details.into() }
    }

    /// Helper constructor for socket failures.
    pub fn transport(operation: impl Into<String>, source: std::io::Error) -> Self {
        NatNetError::Transport { operation: operation.into(), source }
    }

    /// Helper constructor for commands that exhausted their retries.
    pub fn command_failed(command: impl Into<String>, attempts: u32) -> Self {
        NatNetError::CommandFailed { command: command.into(), attempts, source: None }
    }

    /// Helper constructor for rejected bitstream changes.
    pub fn version_change_rejected(requested: Version, reason: impl Into<String>) -> Self {
        NatNetError::VersionChangeRejected { requested, reason: reason.into() }
    }

    /// Helper constructor for settings changed after `run()`.
    pub fn configuration_locked(setting: impl Into<String>) -> Self {
        NatNetError::ConfigurationLocked { setting: setting.into() }
    }

    /// Helper constructor for invalid configuration values.
    pub fn invalid_config(field: impl Into<String>, details: impl Into<String>) -> Self {
        NatNetError::InvalidConfig { field: field.into(), details: details.into() }
    }

    /// Helper constructor for lifecycle violations.
    pub fn lifecycle(operation: impl Into<String>, state: impl ToString) -> Self {
        NatNetError::Lifecycle { operation: operation.into(), state: state.to_string() }
    }
}

impl From<std::io::Error> for NatNetError {
    fn from(err: std::io::Error) -> Self {
        NatNetError::Transport { operation: "<unknown>".to_string(), source: err }
    }
}
