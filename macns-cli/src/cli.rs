//! CLI argument definitions

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use macns_core::config::{DEFAULT_COMMAND, DEFAULT_INTERFACE, DEFAULT_LINK_NAME};
use macns_core::{Cidr, RunConfig, ShapingProfile};

#[derive(Parser, Debug)]
#[command(name = "macns")]
#[command(about = "Run a command inside an isolated macvlan network namespace", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Address and prefix length for the isolated link
    #[arg(long, default_value = "192.168.1.11/24")]
    pub ip: Cidr,

    /// Parent interface the macvlan is created on
    #[arg(short, long, default_value = DEFAULT_INTERFACE)]
    pub interface: String,

    /// Command to run inside the namespace (split on whitespace)
    #[arg(short, long, default_value = DEFAULT_COMMAND)]
    pub command: String,

    /// Gateway address (default: detected from the parent interface)
    #[arg(long)]
    pub gw: Option<IpAddr>,

    /// MAC address for the macvlan
    #[arg(long)]
    pub mac: Option<String>,

    /// MTU for the macvlan
    #[arg(long)]
    pub mtu: Option<u32>,

    /// Added latency in milliseconds
    #[arg(long, default_value_t = 0)]
    pub latency: u64,

    /// Latency jitter in milliseconds
    #[arg(long, default_value_t = 0)]
    pub jitter: u64,

    /// Packet loss in percent
    #[arg(long, default_value_t = 0.0)]
    pub loss: f32,

    /// Bind-mount path for the namespace (default: /var/run/netns/w000t<pid>)
    #[arg(long)]
    pub netns_path: Option<PathBuf>,

    /// Name of the macvlan device
    #[arg(long, default_value = DEFAULT_LINK_NAME)]
    pub link_name: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Build the run configuration from the parsed flags
    pub fn to_config(&self) -> RunConfig {
        let mut config = RunConfig::new()
            .with_address(self.ip)
            .with_parent_interface(&self.interface)
            .with_command(&self.command)
            .with_link_name(&self.link_name)
            .with_shaping(ShapingProfile::from_millis(
                self.latency,
                self.jitter,
                self.loss,
            ));

        if let Some(gw) = self.gw {
            config = config.with_gateway(gw);
        }
        if let Some(mac) = &self.mac {
            config = config.with_mac(mac);
        }
        if let Some(mtu) = self.mtu {
            config = config.with_mtu(mtu);
        }
        if let Some(path) = &self.netns_path {
            config = config.with_netns_path(path);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::time::Duration;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults_match_run_config() {
        let cli = Cli::try_parse_from(["macns"]).unwrap();
        let config = cli.to_config();

        assert_eq!(config, RunConfig::default());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "macns",
            "--ip",
            "10.1.2.3/16",
            "-i",
            "enp3s0",
            "-c",
            "curl -s http://example.com",
            "--gw",
            "10.1.0.1",
            "--mtu",
            "1400",
            "--latency",
            "50",
            "--jitter",
            "10",
            "--loss",
            "0.5",
            "--netns-path",
            "/run/netns/test",
        ])
        .unwrap();
        let config = cli.to_config();

        assert_eq!(config.address.to_string(), "10.1.2.3/16");
        assert_eq!(config.parent_interface, "enp3s0");
        assert_eq!(config.command, "curl -s http://example.com");
        assert_eq!(config.gateway, Some("10.1.0.1".parse().unwrap()));
        assert_eq!(config.mtu, Some(1400));
        assert_eq!(config.shaping.latency, Duration::from_millis(50));
        assert_eq!(config.shaping.jitter, Duration::from_millis(10));
        assert_eq!(config.netns_path, PathBuf::from("/run/netns/test"));
    }

    #[test]
    fn test_zero_mtu_passes_validation() {
        let cli = Cli::try_parse_from(["macns", "--mtu", "0"]).unwrap();
        let config = cli.to_config();

        assert_eq!(config.mtu, Some(0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_address() {
        assert!(Cli::try_parse_from(["macns", "--ip", "192.168.1.11"]).is_err());
        assert!(Cli::try_parse_from(["macns", "--gw", "gateway"]).is_err());
    }
}
