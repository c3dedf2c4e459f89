//! Netlink backend trait for pluggable implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use macns_core::{CallLog, Cidr, Error, MacAddress, Result};

/// Live attributes of a network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkInfo {
    /// Kernel interface index
    pub index: u32,
    /// Interface name
    pub name: String,
    /// Interface flags (`UP`, `BROADCAST`, ...)
    pub flags: Vec<String>,
    /// Current MTU
    pub mtu: Option<u32>,
    /// Hardware address as reported by the kernel
    pub address: Option<String>,
}

impl LinkInfo {
    /// Minimal description for a link known only by name and index
    #[must_use]
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            index,
            name: name.into(),
            flags: Vec::new(),
            mtu: None,
            address: None,
        }
    }

    /// Whether the link is administratively up
    #[must_use]
    pub fn is_up(&self) -> bool {
        self.flags.iter().any(|f| f == "UP")
    }
}

/// One IPv4 route of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Destination (`default` or a prefix)
    pub dst: String,
    /// Next hop, if the route goes through one
    #[serde(default)]
    pub gateway: Option<IpAddr>,
}

impl RouteEntry {
    /// Route through a gateway
    #[must_use]
    pub fn via(dst: impl Into<String>, gateway: IpAddr) -> Self {
        Self {
            dst: dst.into(),
            gateway: Some(gateway),
        }
    }

    /// Directly connected route
    #[must_use]
    pub fn direct(dst: impl Into<String>) -> Self {
        Self {
            dst: dst.into(),
            gateway: None,
        }
    }
}

/// Scope of an installed route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteScope {
    /// Destination is directly reachable on the link
    Link,
    /// Generally applicable, may go through a gateway
    Universe,
}

impl RouteScope {
    /// Name understood by `ip route`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Universe => "global",
        }
    }
}

/// A route to install on a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Destination prefix; `None` is the default route
    pub destination: Option<Cidr>,
    /// Next hop
    pub gateway: Option<IpAddr>,
    /// Route scope
    pub scope: RouteScope,
    /// Output link index
    pub link_index: u32,
}

impl RouteSpec {
    /// Route making `gateway` directly reachable on the link
    #[must_use]
    pub const fn host(gateway: IpAddr, link_index: u32) -> Self {
        Self {
            destination: Some(Cidr::host(gateway)),
            gateway: None,
            scope: RouteScope::Link,
            link_index,
        }
    }

    /// Default route through `gateway`
    #[must_use]
    pub const fn default_via(gateway: IpAddr, link_index: u32) -> Self {
        Self {
            destination: None,
            gateway: Some(gateway),
            scope: RouteScope::Universe,
            link_index,
        }
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination {
            Some(dst) => write!(f, "{dst}")?,
            None => write!(f, "default")?,
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        write!(f, " scope {}", self.scope.as_str())
    }
}

/// Network emulator parameters for a root qdisc
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetemSpec {
    /// Added delay in microseconds
    pub latency_us: u64,
    /// Delay variation in microseconds
    pub jitter_us: u64,
    /// Packet loss in percent
    pub loss_percent: f32,
}

/// Trait for link and routing backends
///
/// This allows for different implementations:
/// - [`IprouteBackend`](crate::IprouteBackend) - Production, iproute2
/// - [`MockNetlink`] - Testing without privileges
///
/// Every call acts in the network namespace of the calling OS thread.
#[async_trait]
pub trait NetlinkBackend: Send + Sync {
    /// Look up a link by name
    ///
    /// # Errors
    /// Returns [`Error::LinkLookup`] if no such link is visible
    async fn link_by_name(&self, name: &str) -> Result<LinkInfo>;

    /// Create a bridge-mode macvlan named `name` on `parent` with no queue length cap
    async fn add_macvlan(&self, name: &str, parent: &LinkInfo) -> Result<()>;

    /// Delete a link
    async fn delete_link(&self, name: &str) -> Result<()>;

    /// Set the hardware address
    async fn set_mac(&self, link: &LinkInfo, mac: MacAddress) -> Result<()>;

    /// Set the MTU
    async fn set_mtu(&self, link: &LinkInfo, mtu: u32) -> Result<()>;

    /// Move the link into the namespace bind-mounted at `netns`
    async fn set_netns(&self, link: &LinkInfo, netns: &Path) -> Result<()>;

    /// Bring a link up
    async fn set_up(&self, name: &str) -> Result<()>;

    /// Assign an address
    async fn add_address(&self, link: &LinkInfo, address: Cidr) -> Result<()>;

    /// Install a root netem qdisc
    async fn add_netem(&self, link: &LinkInfo, spec: NetemSpec) -> Result<()>;

    /// Install a route
    async fn add_route(&self, link: &LinkInfo, route: &RouteSpec) -> Result<()>;

    /// List the IPv4 routes going out of `interface`
    async fn routes(&self, interface: &str) -> Result<Vec<RouteEntry>>;
}

/// Mock backend for testing (no privileges, nothing touches the kernel)
///
/// Calls are recorded into a [`CallLog`] so tests can check ordering across
/// the namespace and link layers.
#[derive(Clone)]
pub struct MockNetlink {
    state: Arc<Mutex<MockState>>,
    log: CallLog,
}

#[derive(Default)]
struct MockState {
    links: HashMap<String, LinkInfo>,
    route_tables: HashMap<String, Vec<RouteEntry>>,
    installed_routes: Vec<RouteSpec>,
    qdiscs: Vec<(String, NetemSpec)>,
    addresses: Vec<(String, Cidr)>,
    reparented: HashMap<String, PathBuf>,
    next_index: u32,
    fail_on: HashSet<&'static str>,
}

impl MockNetlink {
    /// Create a new mock backend with its own log
    #[must_use]
    pub fn new() -> Self {
        Self::with_log(CallLog::new())
    }

    /// Create a mock backend recording into a shared log
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        let mut state = MockState {
            next_index: 100,
            ..MockState::default()
        };
        state
            .links
            .insert("lo".to_string(), LinkInfo::new("lo", 1));
        Self {
            state: Arc::new(Mutex::new(state)),
            log,
        }
    }

    /// Add a visible link
    #[must_use]
    pub fn with_link(self, name: &str, index: u32) -> Self {
        self.configure(|state| {
            let mut link = LinkInfo::new(name, index);
            link.flags = vec!["BROADCAST".to_string(), "UP".to_string()];
            link.mtu = Some(1500);
            state.links.insert(name.to_string(), link);
        })
    }

    /// Set the routes reported for an interface
    #[must_use]
    pub fn with_routes(self, interface: &str, routes: Vec<RouteEntry>) -> Self {
        self.configure(|state| {
            state.route_tables.insert(interface.to_string(), routes);
        })
    }

    /// Make an operation fail
    ///
    /// Operations: `lookup`, `add_macvlan`, `delete`, `mac`, `mtu`, `netns`,
    /// `up`, `addr`, `netem`, `route`, `routes`
    #[must_use]
    pub fn failing(self, operation: &'static str) -> Self {
        self.configure(|state| {
            state.fail_on.insert(operation);
        })
    }

    // Builders run before the mock is shared, so the lock is always free
    fn configure(self, f: impl FnOnce(&mut MockState)) -> Self {
        if let Ok(mut state) = self.state.try_lock() {
            f(&mut state);
        }
        self
    }

    /// Whether a link with this name exists (in any namespace)
    pub async fn has_link(&self, name: &str) -> bool {
        self.state.lock().await.links.contains_key(name)
    }

    /// Attributes of a link, if it exists
    pub async fn link(&self, name: &str) -> Option<LinkInfo> {
        self.state.lock().await.links.get(name).cloned()
    }

    /// Namespace path a link was moved into
    pub async fn reparented_to(&self, name: &str) -> Option<PathBuf> {
        self.state.lock().await.reparented.get(name).cloned()
    }

    /// Routes installed so far, in order
    pub async fn installed_routes(&self) -> Vec<RouteSpec> {
        self.state.lock().await.installed_routes.clone()
    }

    /// Qdiscs installed so far, in order
    pub async fn qdiscs(&self) -> Vec<(String, NetemSpec)> {
        self.state.lock().await.qdiscs.clone()
    }

    /// Addresses assigned so far
    pub async fn addresses(&self) -> Vec<(String, Cidr)> {
        self.state.lock().await.addresses.clone()
    }

    /// The shared call log
    #[must_use]
    pub const fn log(&self) -> &CallLog {
        &self.log
    }

    fn failure(state: &MockState, operation: &'static str) -> Option<String> {
        state
            .fail_on
            .contains(operation)
            .then(|| format!("mock {operation} failure"))
    }
}

impl Default for MockNetlink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockNetlink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockNetlink").finish_non_exhaustive()
    }
}

#[async_trait]
impl NetlinkBackend for MockNetlink {
    async fn link_by_name(&self, name: &str) -> Result<LinkInfo> {
        let state = self.state.lock().await;
        self.log.record(format!("link:lookup {name}"));

        if let Some(message) = Self::failure(&state, "lookup") {
            return Err(Error::LinkLookup {
                name: name.to_string(),
                message,
            });
        }

        state
            .links
            .get(name)
            .cloned()
            .ok_or_else(|| Error::LinkLookup {
                name: name.to_string(),
                message: "no such device".to_string(),
            })
    }

    async fn add_macvlan(&self, name: &str, parent: &LinkInfo) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log
            .record(format!("link:add {name} parent {}", parent.name));

        if let Some(message) = Self::failure(&state, "add_macvlan") {
            return Err(Error::LinkCreate {
                name: name.to_string(),
                message,
            });
        }
        if state.links.contains_key(name) {
            return Err(Error::LinkCreate {
                name: name.to_string(),
                message: "file exists".to_string(),
            });
        }

        let index = state.next_index;
        state.next_index += 1;
        let mut link = LinkInfo::new(name, index);
        link.flags = vec!["BROADCAST".to_string(), "MULTICAST".to_string()];
        link.mtu = parent.mtu;
        state.links.insert(name.to_string(), link);

        tracing::debug!(name, index, "Mock: Created macvlan");
        Ok(())
    }

    async fn delete_link(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("link:delete {name}"));

        if let Some(message) = Self::failure(&state, "delete") {
            return Err(Error::LinkDelete {
                name: name.to_string(),
                message,
            });
        }
        state.links.remove(name);
        Ok(())
    }

    async fn set_mac(&self, link: &LinkInfo, mac: MacAddress) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("link:mac {} {mac}", link.name));

        if let Some(message) = Self::failure(&state, "mac") {
            return Err(Error::MacSet {
                name: link.name.clone(),
                message,
            });
        }
        if let Some(entry) = state.links.get_mut(&link.name) {
            entry.address = Some(mac.to_string());
        }
        Ok(())
    }

    async fn set_mtu(&self, link: &LinkInfo, mtu: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("link:mtu {} {mtu}", link.name));

        if let Some(message) = Self::failure(&state, "mtu") {
            return Err(Error::MtuSet {
                name: link.name.clone(),
                mtu,
                message,
            });
        }
        if let Some(entry) = state.links.get_mut(&link.name) {
            entry.mtu = Some(mtu);
        }
        Ok(())
    }

    async fn set_netns(&self, link: &LinkInfo, netns: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log
            .record(format!("link:reparent {} {}", link.name, netns.display()));

        if let Some(message) = Self::failure(&state, "netns") {
            return Err(Error::Reparent {
                name: link.name.clone(),
                message,
            });
        }
        state
            .reparented
            .insert(link.name.clone(), netns.to_path_buf());
        Ok(())
    }

    async fn set_up(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("link:up {name}"));

        if let Some(message) = Self::failure(&state, "up") {
            return Err(Error::LinkUp {
                name: name.to_string(),
                message,
            });
        }
        if let Some(entry) = state.links.get_mut(name) {
            if !entry.is_up() {
                entry.flags.push("UP".to_string());
            }
        }
        Ok(())
    }

    async fn add_address(&self, link: &LinkInfo, address: Cidr) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("addr:add {} {address}", link.name));

        if let Some(message) = Self::failure(&state, "addr") {
            return Err(Error::AddrAdd {
                name: link.name.clone(),
                address: address.to_string(),
                message,
            });
        }
        state.addresses.push((link.name.clone(), address));
        Ok(())
    }

    async fn add_netem(&self, link: &LinkInfo, spec: NetemSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("qdisc:add {}", link.name));

        if let Some(message) = Self::failure(&state, "netem") {
            return Err(Error::Qdisc {
                name: link.name.clone(),
                message,
            });
        }
        state.qdiscs.push((link.name.clone(), spec));
        Ok(())
    }

    async fn add_route(&self, link: &LinkInfo, route: &RouteSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        self.log.record(format!("route:add {} {route}", link.name));

        if let Some(message) = Self::failure(&state, "route") {
            return Err(Error::Route {
                name: link.name.clone(),
                route: route.to_string(),
                message,
            });
        }
        state.installed_routes.push(route.clone());
        Ok(())
    }

    async fn routes(&self, interface: &str) -> Result<Vec<RouteEntry>> {
        let state = self.state.lock().await;
        self.log.record(format!("route:list {interface}"));

        if let Some(message) = Self::failure(&state, "routes") {
            return Err(Error::Route {
                name: interface.to_string(),
                route: "list".to_string(),
                message,
            });
        }
        Ok(state.route_tables.get(interface).cloned().unwrap_or_default())
    }
}
