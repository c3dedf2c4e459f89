//! Network namespace management and command execution
//!
//! This crate owns everything that reads or mutates the calling thread's
//! network namespace:
//! - Capturing and restoring the original namespace
//! - Creating a namespace and naming it with a bind mount
//! - Preparing the named-namespace directory
//! - Running the user command from inside the namespace, with interrupt handling
//!
//! Namespace context is per OS thread. Every call here affects only the
//! thread it runs on, so callers must keep all of them on one thread.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod executor;
pub mod manager;

pub use backend::{DirState, MockNamespaceBackend, NamespaceBackend, NamespaceHandle, TargetNamespace};
pub use executor::{CommandExecutor, CommandLine, ExecState, InterruptListener};
pub use manager::NetnsManager;
