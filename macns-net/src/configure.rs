//! Network configuration inside the target namespace
//!
//! Every method here must run on the thread that has entered the target
//! namespace; the link is only visible there once it has been reparented.

use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

use macns_core::{Cidr, Result, ShapingProfile};

use crate::backend::{LinkInfo, NetemSpec, NetlinkBackend, RouteSpec};

/// Loopback interface name
pub const LOOPBACK: &str = "lo";

/// Configures address, link state, shaping, and routes of the isolated link
pub struct NetworkConfigurator {
    backend: Arc<dyn NetlinkBackend>,
}

impl NetworkConfigurator {
    /// Create a configurator over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn NetlinkBackend>) -> Self {
        Self { backend }
    }

    /// Bring up the namespace's loopback interface
    pub async fn loopback_up(&self) -> Result<()> {
        self.backend.set_up(LOOPBACK).await?;
        debug!("Loopback up");
        Ok(())
    }

    /// Assign `address` to the link
    pub async fn assign_address(&self, link: &LinkInfo, address: Cidr) -> Result<()> {
        self.backend.add_address(link, address).await?;
        info!(name = %link.name, %address, "Assigned address");
        Ok(())
    }

    /// Bring the link up
    pub async fn bring_up(&self, link: &LinkInfo) -> Result<()> {
        self.backend.set_up(&link.name).await?;
        debug!(name = %link.name, "Link up");
        Ok(())
    }

    /// Install a netem root qdisc for `profile`; no-op for the all-zero profile
    pub async fn apply_shaping(&self, link: &LinkInfo, profile: &ShapingProfile) -> Result<()> {
        let Some(spec) = netem_spec(profile) else {
            debug!(name = %link.name, "No shaping requested");
            return Ok(());
        };

        self.backend.add_netem(link, spec).await?;
        info!(
            name = %link.name,
            latency_us = spec.latency_us,
            jitter_us = spec.jitter_us,
            loss = spec.loss_percent,
            "Applied traffic shaping"
        );
        Ok(())
    }

    /// Install the host route to `gateway`, then the default route through it
    ///
    /// The default route needs the gateway to be directly reachable, so the
    /// order is fixed.
    pub async fn install_routes(&self, link: &LinkInfo, gateway: IpAddr) -> Result<()> {
        let host = RouteSpec::host(gateway, link.index);
        self.backend.add_route(link, &host).await?;
        debug!(name = %link.name, route = %host, "Installed host route");

        let default = RouteSpec::default_via(gateway, link.index);
        self.backend.add_route(link, &default).await?;
        info!(name = %link.name, %gateway, "Installed default route");
        Ok(())
    }
}

impl std::fmt::Debug for NetworkConfigurator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfigurator").finish_non_exhaustive()
    }
}

/// Netem parameters for a profile, `None` when nothing is to be shaped
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn netem_spec(profile: &ShapingProfile) -> Option<NetemSpec> {
    if profile.is_none() {
        return None;
    }
    Some(NetemSpec {
        latency_us: profile.latency.as_micros() as u64,
        jitter_us: profile.jitter.as_micros() as u64,
        loss_percent: profile.loss,
    })
}
