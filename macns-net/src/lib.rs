//! Link provisioning and in-namespace network configuration
//!
//! This crate provides:
//! - The [`NetlinkBackend`] trait with a production iproute2 backend and a mock
//! - [`LinkProvisioner`]: macvlan creation, MAC/MTU overrides, reparenting
//! - [`NetworkConfigurator`]: address, link state, shaping, and routes inside the namespace
//! - Default gateway discovery from the parent interface's routes
//!
//! Every operation acts on the network namespace of the calling OS thread.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod configure;
pub mod gateway;
pub mod iproute;
pub mod link;

pub use backend::{LinkInfo, MockNetlink, NetemSpec, NetlinkBackend, RouteEntry, RouteScope, RouteSpec};
pub use configure::NetworkConfigurator;
pub use gateway::{detect_gateway, select_gateway};
pub use iproute::IprouteBackend;
pub use link::LinkProvisioner;
