//! Error types for macns

use std::path::PathBuf;

use thiserror::Error;

/// macns error types
///
/// Every variant names the operation that failed and carries enough context
/// (path, link name, address, program) for an operator to act on it.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Reading the current network namespace failed
    #[error("Failed to query current network namespace: {source}")]
    NamespaceQuery {
        /// Underlying error
        source: std::io::Error,
    },

    /// Creating a new network namespace failed
    #[error("Failed to create network namespace: {source}")]
    NamespaceCreate {
        /// Underlying error
        source: nix::Error,
    },

    /// Switching the calling thread's network namespace failed
    #[error("Failed to switch network namespace: {source}")]
    NamespaceSwitch {
        /// Underlying error
        source: nix::Error,
    },

    /// Closing a namespace handle failed
    #[error("Failed to close namespace handle: {source}")]
    NamespaceClose {
        /// Underlying error
        source: nix::Error,
    },

    /// A mount failed
    #[error("Failed to mount {}: {source}", path.display())]
    Mount {
        /// Mount target
        path: PathBuf,
        /// Underlying error
        source: nix::Error,
    },

    /// An unmount failed
    #[error("Failed to unmount {}: {source}", path.display())]
    Unmount {
        /// Mount target
        path: PathBuf,
        /// Underlying error
        source: nix::Error,
    },

    /// Creating a file failed
    #[error("Failed to create {}: {source}", path.display())]
    File {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Removing a file failed
    #[error("Failed to remove {}: {source}", path.display())]
    FileRemove {
        /// File path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Inspecting or creating a directory failed
    #[error("Failed to prepare directory {}: {source}", path.display())]
    Dir {
        /// Directory path
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Looking up a link by name failed
    #[error("Failed to look up link {name}: {message}")]
    LinkLookup {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// Creating a link failed
    #[error("Failed to create link {name}: {message}")]
    LinkCreate {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// Deleting a link failed
    #[error("Failed to delete link {name}: {message}")]
    LinkDelete {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// A MAC address could not be parsed
    #[error("Invalid MAC address: {input}")]
    MacParse {
        /// Rejected input
        input: String,
    },

    /// Applying a MAC address failed
    #[error("Failed to set MAC address on {name}: {message}")]
    MacSet {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// Applying an MTU failed
    #[error("Failed to set MTU {mtu} on {name}: {message}")]
    MtuSet {
        /// Link name
        name: String,
        /// Requested MTU
        mtu: u32,
        /// Error message
        message: String,
    },

    /// Moving a link into another namespace failed
    #[error("Failed to move link {name} into namespace: {message}")]
    Reparent {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// An address/prefix could not be parsed
    #[error("Invalid address {input}: {reason}")]
    AddrParse {
        /// Rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Assigning an address failed
    #[error("Failed to add address {address} to {name}: {message}")]
    AddrAdd {
        /// Link name
        name: String,
        /// Address being assigned
        address: String,
        /// Error message
        message: String,
    },

    /// Bringing a link up failed
    #[error("Failed to bring up {name}: {message}")]
    LinkUp {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// Installing a queueing discipline failed
    #[error("Failed to install qdisc on {name}: {message}")]
    Qdisc {
        /// Link name
        name: String,
        /// Error message
        message: String,
    },

    /// Installing or listing routes failed
    #[error("Failed to install route {route} on {name}: {message}")]
    Route {
        /// Link name
        name: String,
        /// Route description
        route: String,
        /// Error message
        message: String,
    },

    /// No route of the parent interface carries a gateway
    #[error("No default gateway found on interface {interface}")]
    NoDefaultGateway {
        /// Parent interface name
        interface: String,
    },

    /// The command's executable could not be found
    #[error("Command not found: {program}: {message}")]
    Lookup {
        /// Program name
        program: String,
        /// Error message
        message: String,
    },

    /// Spawning the command failed
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program path
        program: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Waiting for the command failed
    #[error("Failed to wait for child process: {source}")]
    Wait {
        /// Underlying error
        source: std::io::Error,
    },

    /// An interrupt arrived before the command was started
    #[error("Interrupted by signal {signal} before the command started")]
    Interrupted {
        /// Signal number received
        signal: i32,
    },

    /// Registering the interrupt/termination listener failed
    #[error("Failed to listen for signals: {source}")]
    Signal {
        /// Underlying error
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Permission denied
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Operation that was denied
        operation: String,
    },
}

impl Error {
    /// Build an [`Error::InvalidConfig`] from any message
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether this error came from releasing a namespace
    ///
    /// Teardown failures leave residual mounts or files behind and are
    /// reported to the operator instead of aborting the run.
    #[must_use]
    pub const fn is_teardown(&self) -> bool {
        matches!(
            self,
            Self::NamespaceClose { .. } | Self::Unmount { .. } | Self::FileRemove { .. }
        )
    }

    /// Exit code for an interrupt, `128 + signal` as a shell reports it
    #[must_use]
    pub const fn interrupt_exit_code(&self) -> Option<i32> {
        match self {
            Self::Interrupted { signal } => Some(128 + *signal),
            _ => None,
        }
    }
}

/// Result type alias for macns operations
pub type Result<T> = std::result::Result<T, Error>;
