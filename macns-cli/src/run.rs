//! Run command implementation

use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

use macns_core::RunConfig;
use macns_namespace::NetnsManager;
use macns_net::IprouteBackend;

use crate::cli::Cli;
use crate::lifecycle::Lifecycle;

/// Name of the thread that owns every namespace switch
pub const WORKER_THREAD: &str = "macns-netns";

/// Validate, check privileges, and run the lifecycle on a dedicated thread
///
/// Returns the process exit code.
pub fn execute(cli: &Cli) -> Result<i32> {
    let config = cli.to_config();
    config.validate().context("Invalid configuration")?;

    // Validate we're running as root
    if !nix::unistd::geteuid().is_root() {
        anyhow::bail!("Must run as root. Try: sudo macns ...");
    }

    info!(
        interface = %config.parent_interface,
        address = %config.address,
        netns = %config.netns_path.display(),
        "🦀 Starting macns"
    );

    let worker = thread::Builder::new()
        .name(WORKER_THREAD.to_string())
        .spawn(move || run_pinned(&config))
        .context("Failed to start namespace worker thread")?;

    worker
        .join()
        .map_err(|_| anyhow!("Namespace worker thread panicked"))?
}

/// Body of the worker thread
///
/// A current-thread runtime keeps every future, and therefore every
/// namespace-sensitive call, on this OS thread.
fn run_pinned(config: &RunConfig) -> Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let lifecycle = Lifecycle::new(Arc::new(NetnsManager::new()), Arc::new(IprouteBackend::new()));
        let report = match lifecycle.run(config).await {
            Ok(report) => report,
            Err(e) => match e.interrupt_exit_code() {
                Some(code) => {
                    warn!("⚠️  {e}, exiting with code {code}");
                    return Ok(code);
                }
                None => return Err(e).context("Run failed"),
            },
        };

        let code = report.exit_code();
        if let Some(e) = &report.teardown {
            warn!(error = %e, "Command finished but namespace teardown failed");
        }
        if code == 0 {
            info!("✅ Done");
        } else {
            warn!("⚠️  Exiting with code {code}");
        }
        debug!(exit = %report.exit, "Run report");
        Ok(code)
    })
}
