//! Production backend driving the iproute2 tools
//!
//! `ip` and `tc` are spawned from the calling thread, so each invocation
//! runs in that thread's network namespace. JSON output (`ip -j`) is used
//! wherever attributes are read back.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use macns_core::{Cidr, Error, MacAddress, Result};

use crate::backend::{LinkInfo, NetemSpec, NetlinkBackend, RouteEntry, RouteSpec};

/// Link object as printed by `ip -j link show`
#[derive(Debug, Deserialize)]
struct IpLink {
    ifindex: u32,
    ifname: String,
    #[serde(default)]
    flags: Vec<String>,
    mtu: Option<u32>,
    address: Option<String>,
}

impl From<IpLink> for LinkInfo {
    fn from(link: IpLink) -> Self {
        Self {
            index: link.ifindex,
            name: link.ifname,
            flags: link.flags,
            mtu: link.mtu,
            address: link.address,
        }
    }
}

/// iproute2 backend
#[derive(Debug, Clone)]
pub struct IprouteBackend {
    ip: PathBuf,
    tc: PathBuf,
}

impl Default for IprouteBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IprouteBackend {
    /// Use `ip` and `tc` from `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::with_programs("ip", "tc")
    }

    /// Use explicit `ip` and `tc` executables
    #[must_use]
    pub fn with_programs(ip: impl Into<PathBuf>, tc: impl Into<PathBuf>) -> Self {
        Self {
            ip: ip.into(),
            tc: tc.into(),
        }
    }

    /// Run a tool and return its stdout, or a message describing the failure
    async fn exec(program: &Path, args: &[String]) -> std::result::Result<String, String> {
        debug!(program = %program.display(), args = %args.join(" "), "Running iproute2");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {e}", program.display()))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.is_empty() {
            Err(format!("{} exited with {}", program.display(), output.status))
        } else {
            Err(stderr)
        }
    }

    async fn ip(&self, args: &[String]) -> std::result::Result<String, String> {
        Self::exec(&self.ip, args).await
    }

    async fn tc(&self, args: &[String]) -> std::result::Result<String, String> {
        Self::exec(&self.tc, args).await
    }
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn macvlan_args(name: &str, parent: &str) -> Vec<String> {
    strings([
        "link", "add", "link", parent, "name", name, "txqueuelen", "0", "type", "macvlan", "mode",
        "bridge",
    ])
}

fn netns_args(name: &str, netns: &Path) -> Vec<String> {
    let mut args = strings(["link", "set", "dev", name, "netns"]);
    args.push(netns.display().to_string());
    args
}

fn netem_args(name: &str, spec: NetemSpec) -> Vec<String> {
    let mut args = strings(["qdisc", "add", "dev", name, "root", "netem", "delay"]);
    args.push(format!("{}us", spec.latency_us));
    args.push(format!("{}us", spec.jitter_us));
    args.push("loss".to_string());
    args.push(format!("{}%", spec.loss_percent));
    args
}

fn route_args(name: &str, route: &RouteSpec) -> Vec<String> {
    let mut args = strings(["route", "add"]);
    args.push(
        route
            .destination
            .map_or_else(|| "default".to_string(), |dst| dst.to_string()),
    );
    if let Some(gw) = route.gateway {
        args.push("via".to_string());
        args.push(gw.to_string());
    }
    args.extend(strings(["dev", name, "scope", route.scope.as_str()]));
    args
}

fn parse_links(json: &str) -> std::result::Result<Vec<LinkInfo>, String> {
    let links: Vec<IpLink> =
        serde_json::from_str(json).map_err(|e| format!("unexpected ip output: {e}"))?;
    Ok(links.into_iter().map(LinkInfo::from).collect())
}

fn parse_routes(json: &str) -> std::result::Result<Vec<RouteEntry>, String> {
    // `ip -j` prints nothing at all for an empty table
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|e| format!("unexpected ip output: {e}"))
}

#[async_trait]
impl NetlinkBackend for IprouteBackend {
    async fn link_by_name(&self, name: &str) -> Result<LinkInfo> {
        let lookup_err = |message: String| Error::LinkLookup {
            name: name.to_string(),
            message,
        };

        let json = self
            .ip(&strings(["-j", "link", "show", "dev", name]))
            .await
            .map_err(lookup_err)?;

        parse_links(&json)
            .map_err(lookup_err)?
            .into_iter()
            .next()
            .ok_or_else(|| lookup_err("no such device".to_string()))
    }

    async fn add_macvlan(&self, name: &str, parent: &LinkInfo) -> Result<()> {
        self.ip(&macvlan_args(name, &parent.name))
            .await
            .map_err(|message| Error::LinkCreate {
                name: name.to_string(),
                message,
            })?;
        info!(name, parent = %parent.name, "Created macvlan");
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        self.ip(&strings(["link", "del", "dev", name]))
            .await
            .map_err(|message| Error::LinkDelete {
                name: name.to_string(),
                message,
            })?;
        Ok(())
    }

    async fn set_mac(&self, link: &LinkInfo, mac: MacAddress) -> Result<()> {
        let mac = mac.to_string();
        self.ip(&strings(["link", "set", "dev", &link.name, "address", &mac]))
            .await
            .map_err(|message| Error::MacSet {
                name: link.name.clone(),
                message,
            })?;
        Ok(())
    }

    async fn set_mtu(&self, link: &LinkInfo, mtu: u32) -> Result<()> {
        let value = mtu.to_string();
        self.ip(&strings(["link", "set", "dev", &link.name, "mtu", &value]))
            .await
            .map_err(|message| Error::MtuSet {
                name: link.name.clone(),
                mtu,
                message,
            })?;
        Ok(())
    }

    async fn set_netns(&self, link: &LinkInfo, netns: &Path) -> Result<()> {
        self.ip(&netns_args(&link.name, netns))
            .await
            .map_err(|message| Error::Reparent {
                name: link.name.clone(),
                message,
            })?;
        Ok(())
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        self.ip(&strings(["link", "set", "dev", name, "up"]))
            .await
            .map_err(|message| Error::LinkUp {
                name: name.to_string(),
                message,
            })?;
        Ok(())
    }

    async fn add_address(&self, link: &LinkInfo, address: Cidr) -> Result<()> {
        let cidr = address.to_string();
        self.ip(&strings(["addr", "add", &cidr, "dev", &link.name]))
            .await
            .map_err(|message| Error::AddrAdd {
                name: link.name.clone(),
                address: cidr.clone(),
                message,
            })?;
        Ok(())
    }

    async fn add_netem(&self, link: &LinkInfo, spec: NetemSpec) -> Result<()> {
        self.tc(&netem_args(&link.name, spec))
            .await
            .map_err(|message| Error::Qdisc {
                name: link.name.clone(),
                message,
            })?;
        Ok(())
    }

    async fn add_route(&self, link: &LinkInfo, route: &RouteSpec) -> Result<()> {
        self.ip(&route_args(&link.name, route))
            .await
            .map_err(|message| Error::Route {
                name: link.name.clone(),
                route: route.to_string(),
                message,
            })?;
        Ok(())
    }

    async fn routes(&self, interface: &str) -> Result<Vec<RouteEntry>> {
        let route_err = |message: String| Error::Route {
            name: interface.to_string(),
            route: "list".to_string(),
            message,
        };

        let json = self
            .ip(&strings(["-j", "-4", "route", "show", "dev", interface]))
            .await
            .map_err(route_err)?;
        parse_routes(&json).map_err(route_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_macvlan_args() {
        assert_eq!(
            macvlan_args("peth0", "eth0").join(" "),
            "link add link eth0 name peth0 txqueuelen 0 type macvlan mode bridge"
        );
    }

    #[test]
    fn test_netem_args_in_microseconds() {
        let spec = NetemSpec {
            latency_us: 50_000,
            jitter_us: 10_000,
            loss_percent: 0.5,
        };
        assert_eq!(
            netem_args("peth0", spec).join(" "),
            "qdisc add dev peth0 root netem delay 50000us 10000us loss 0.5%"
        );
    }

    #[test]
    fn test_route_args() {
        let gw = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

        assert_eq!(
            route_args("peth0", &RouteSpec::host(gw, 7)).join(" "),
            "route add 10.0.0.1/32 dev peth0 scope link"
        );
        assert_eq!(
            route_args("peth0", &RouteSpec::default_via(gw, 7)).join(" "),
            "route add default via 10.0.0.1 dev peth0 scope global"
        );
    }

    #[test]
    fn test_netns_args_use_path() {
        assert_eq!(
            netns_args("peth0", Path::new("/var/run/netns/w000t42")).join(" "),
            "link set dev peth0 netns /var/run/netns/w000t42"
        );
    }

    #[test]
    fn test_parse_links() {
        let json = r#"[{"ifindex":2,"ifname":"eth0","flags":["BROADCAST","MULTICAST","UP","LOWER_UP"],
            "mtu":1500,"qdisc":"fq_codel","operstate":"UP","link_type":"ether",
            "address":"52:54:00:12:34:56","broadcast":"ff:ff:ff:ff:ff:ff"}]"#;
        let links = parse_links(json).unwrap();

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].index, 2);
        assert_eq!(links[0].name, "eth0");
        assert!(links[0].is_up());
        assert_eq!(links[0].address.as_deref(), Some("52:54:00:12:34:56"));
    }

    #[test]
    fn test_parse_routes_empty_output() {
        assert!(parse_routes("").unwrap().is_empty());
        assert!(parse_routes("[]").unwrap().is_empty());
        assert!(parse_routes("not json").is_err());
    }

    #[tokio::test]
    async fn test_missing_program_reports_lookup_error() {
        let backend = IprouteBackend::with_programs("/nonexistent/ip", "/nonexistent/tc");
        let result = backend.link_by_name("eth0").await;

        assert!(matches!(result, Err(Error::LinkLookup { .. })));
    }

    #[tokio::test]
    #[ignore] // Requires iproute2
    async fn test_loopback_lookup() {
        let backend = IprouteBackend::new();
        let lo = backend.link_by_name("lo").await.unwrap();
        assert_eq!(lo.name, "lo");
        assert!(lo.index > 0);
    }
}
