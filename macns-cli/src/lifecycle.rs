//! Lifecycle orchestration
//!
//! Sequences namespace, link, and process operations for one run. Every
//! step runs on the calling thread, which must stay the same OS thread for
//! the whole run.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use macns_core::{CallLog, Error, ExitInfo, Result, RunConfig};
use macns_namespace::{CommandExecutor, InterruptListener, NamespaceBackend, NamespaceHandle, TargetNamespace};
use macns_net::{LinkInfo, LinkProvisioner, NetlinkBackend, NetworkConfigurator, detect_gateway};

/// Exit code when the command succeeded but the namespace could not be removed
pub const TEARDOWN_FAILED_EXIT: i32 = 2;

/// Outcome of a run that reached the command
#[derive(Debug)]
pub struct RunReport {
    /// How the command ended
    pub exit: ExitInfo,
    /// Namespace teardown failure, if any
    pub teardown: Option<Error>,
}

impl RunReport {
    /// Process exit code for this run
    pub const fn exit_code(&self) -> i32 {
        if self.teardown.is_some() && self.exit.success() {
            TEARDOWN_FAILED_EXIT
        } else {
            self.exit.exit_code()
        }
    }
}

/// A macvlan created in the original namespace and not yet handed to the target
///
/// Until disarmed, the link has no namespace to reclaim it and must be
/// deleted explicitly.
struct PendingLink {
    link: LinkInfo,
    armed: bool,
}

impl PendingLink {
    const fn new(link: LinkInfo) -> Self {
        Self { link, armed: true }
    }

    const fn disarm(&mut self) {
        self.armed = false;
    }

    async fn release(self, links: &LinkProvisioner) {
        if !self.armed {
            return;
        }
        if let Err(e) = links.delete(&self.link.name).await {
            warn!(name = %self.link.name, error = %e, "Could not delete abandoned macvlan");
        }
    }
}

/// Runs one command in a freshly provisioned namespace and tears it down
pub struct Lifecycle {
    namespaces: Arc<dyn NamespaceBackend>,
    netlink: Arc<dyn NetlinkBackend>,
    links: LinkProvisioner,
    network: NetworkConfigurator,
    log: Option<CallLog>,
}

impl Lifecycle {
    /// Create an orchestrator over namespace and netlink backends
    pub fn new(namespaces: Arc<dyn NamespaceBackend>, netlink: Arc<dyn NetlinkBackend>) -> Self {
        Self {
            links: LinkProvisioner::new(Arc::clone(&netlink)),
            network: NetworkConfigurator::new(Arc::clone(&netlink)),
            namespaces,
            netlink,
            log: None,
        }
    }

    /// Record command spawn and kill into a shared log
    #[cfg(test)]
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Run with SIGINT/SIGTERM as the interrupt
    ///
    /// The listener is registered before anything is provisioned. An
    /// interrupt during setup is held back; the command is then never
    /// started and the regular teardown runs.
    pub async fn run(&self, config: &RunConfig) -> Result<RunReport> {
        let mut listener = InterruptListener::new()?;
        self.run_until(config, listener.recv()).await
    }

    /// Run until the command exits or `interrupt` resolves with a signal number
    pub async fn run_until<F>(&self, config: &RunConfig, interrupt: F) -> Result<RunReport>
    where
        F: Future<Output = i32>,
    {
        let original = self.namespaces.capture_original()?;
        let result = self.provision(config, &original, interrupt).await;
        self.namespaces.release(original);

        if let Err(e) = &result {
            error!(error = %e, "Run aborted");
        }
        result
    }

    async fn provision<F>(
        &self,
        config: &RunConfig,
        original: &NamespaceHandle,
        interrupt: F,
    ) -> Result<RunReport>
    where
        F: Future<Output = i32>,
    {
        self.namespaces.ensure_netns_dir(&config.netns_dir)?;

        let parent = self.links.parent(&config.parent_interface).await?;
        let gateway = match config.gateway {
            Some(gateway) => gateway,
            None => detect_gateway(self.netlink.as_ref(), &config.parent_interface).await?,
        };

        let link = self
            .links
            .create_macvlan(&config.link_name, &parent)
            .await?;
        let mut pending = PendingLink::new(link);

        let result = self
            .isolate(config, original, &mut pending, gateway, interrupt)
            .await;

        // The macvlan lives in the original namespace; never delete by name elsewhere
        if pending.armed && self.restore(original).is_err() {
            warn!(
                name = %pending.link.name,
                "Not back in the original namespace, leaving macvlan in place"
            );
            pending.disarm();
        }
        pending.release(&self.links).await;
        result
    }

    async fn isolate<F>(
        &self,
        config: &RunConfig,
        original: &NamespaceHandle,
        pending: &mut PendingLink,
        gateway: IpAddr,
        interrupt: F,
    ) -> Result<RunReport>
    where
        F: Future<Output = i32>,
    {
        self.links
            .set_mac_address(&pending.link, config.mac.as_deref())
            .await?;
        self.links.set_mtu(&pending.link, config.mtu).await?;

        let target = self.namespaces.create_named(&config.netns_path)?;
        info!("🔒 Namespace {} ready", target.path.display());

        let result = self
            .configure_and_run(config, original, &target, pending, gateway, interrupt)
            .await;
        let restored = self.restore(original);

        let path = target.path.clone();
        let teardown = self.namespaces.destroy(target).err();
        match &teardown {
            Some(e) => warn!(
                path = %path.display(),
                error = %e,
                "Namespace teardown failed, remove the mount and file by hand"
            ),
            None => info!("🧹 Namespace {} removed", path.display()),
        }

        let exit = result?;
        restored?;
        Ok(RunReport { exit, teardown })
    }

    async fn configure_and_run<F>(
        &self,
        config: &RunConfig,
        original: &NamespaceHandle,
        target: &TargetNamespace,
        pending: &mut PendingLink,
        gateway: IpAddr,
        interrupt: F,
    ) -> Result<ExitInfo>
    where
        F: Future<Output = i32>,
    {
        self.namespaces.enter(original)?;
        self.links.reparent(&pending.link, &target.path).await?;
        pending.disarm();

        self.namespaces.enter(&target.handle)?;
        let link = &pending.link;
        self.network.loopback_up().await?;
        self.network.assign_address(link, config.address).await?;
        self.network.bring_up(link).await?;
        self.network.apply_shaping(link, &config.shaping).await?;
        self.network.install_routes(link, gateway).await?;

        info!("🚀 Running `{}`", config.command);
        let mut executor = CommandExecutor::new();
        if let Some(log) = &self.log {
            executor = executor.with_log(log.clone());
        }
        executor
            .run_until(&config.command, interrupt, || self.namespaces.enter(original))
            .await
    }

    fn restore(&self, original: &NamespaceHandle) -> Result<()> {
        self.namespaces.enter(original).inspect_err(|e| {
            error!(error = %e, "Could not return to the original namespace");
        })
    }
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").finish_non_exhaustive()
    }
}
