//! macns Core - Foundation types, configuration, and errors
//!
//! This crate provides the shared abstractions used by the namespace, network,
//! and CLI crates: the error taxonomy, address and shaping value types, and the
//! run configuration consumed by the lifecycle orchestrator.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod journal;
pub mod types;

pub use config::RunConfig;
pub use error::{Error, Result};
pub use journal::CallLog;
pub use types::{Cidr, ExitInfo, MacAddress, ShapingProfile, Termination};
