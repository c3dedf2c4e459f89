//! Run configuration

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::types::{Cidr, ShapingProfile};
use crate::{Error, Result};

/// Directory holding named network namespaces
pub const NETNS_RUN_DIR: &str = "/run/netns";

/// Prefix of the default namespace bind-mount path
pub const DEFAULT_NETNS_PREFIX: &str = "/var/run/netns/w000t";

/// Name given to the macvlan device
pub const DEFAULT_LINK_NAME: &str = "peth0";

/// Default parent interface
pub const DEFAULT_INTERFACE: &str = "eth0";

/// Default command
pub const DEFAULT_COMMAND: &str = "ip route";

/// Kernel limit on interface name length (`IFNAMSIZ - 1`)
pub const MAX_LINK_NAME_LEN: usize = 15;

/// Everything the lifecycle needs to provision the namespace and run the command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Address/prefix assigned to the macvlan inside the namespace
    pub address: Cidr,

    /// Physical interface the macvlan is cloned from
    pub parent_interface: String,

    /// Command line run inside the namespace
    pub command: String,

    /// Gateway; discovered from the parent interface's routes when absent
    pub gateway: Option<IpAddr>,

    /// MAC address override for the macvlan
    pub mac: Option<String>,

    /// MTU override for the macvlan
    pub mtu: Option<u32>,

    /// Traffic impairment applied to the macvlan
    pub shaping: ShapingProfile,

    /// Bind-mount path naming the namespace
    pub netns_path: PathBuf,

    /// Name of the macvlan device
    pub link_name: String,

    /// Directory that must exist (and be mounted) for named namespaces
    pub netns_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            address: Cidr::from_parts(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 11)), 24),
            parent_interface: DEFAULT_INTERFACE.to_string(),
            command: DEFAULT_COMMAND.to_string(),
            gateway: None,
            mac: None,
            mtu: None,
            shaping: ShapingProfile::default(),
            netns_path: default_netns_path(),
            link_name: DEFAULT_LINK_NAME.to_string(),
            netns_dir: PathBuf::from(NETNS_RUN_DIR),
        }
    }
}

/// `/var/run/netns/w000t<pid>` for the current process
#[must_use]
pub fn default_netns_path() -> PathBuf {
    PathBuf::from(format!("{DEFAULT_NETNS_PREFIX}{}", std::process::id()))
}

impl RunConfig {
    /// Create a configuration with the defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address/prefix of the isolated link
    #[must_use]
    pub const fn with_address(mut self, address: Cidr) -> Self {
        self.address = address;
        self
    }

    /// Set the parent interface
    #[must_use]
    pub fn with_parent_interface(mut self, name: impl Into<String>) -> Self {
        self.parent_interface = name.into();
        self
    }

    /// Set the command line
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Set an explicit gateway
    #[must_use]
    pub const fn with_gateway(mut self, gateway: IpAddr) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set a MAC address override
    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    /// Set an MTU override
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set the shaping profile
    #[must_use]
    pub const fn with_shaping(mut self, shaping: ShapingProfile) -> Self {
        self.shaping = shaping;
        self
    }

    /// Set the namespace bind-mount path
    #[must_use]
    pub fn with_netns_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.netns_path = path.into();
        self
    }

    /// Set the macvlan device name
    #[must_use]
    pub fn with_link_name(mut self, name: impl Into<String>) -> Self {
        self.link_name = name.into();
        self
    }

    /// Set the named-namespace directory
    #[must_use]
    pub fn with_netns_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.netns_dir = dir.into();
        self
    }

    /// Validate the configuration before any kernel resource is touched
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.command.split_whitespace().next().is_none() {
            return Err(Error::invalid_config("command cannot be empty"));
        }

        if self.parent_interface.trim().is_empty() {
            return Err(Error::invalid_config("parent interface cannot be empty"));
        }

        if self.link_name.is_empty() || self.link_name.len() > MAX_LINK_NAME_LEN {
            return Err(Error::invalid_config(format!(
                "link name must be 1-{MAX_LINK_NAME_LEN} bytes, got {:?}",
                self.link_name
            )));
        }

        if self.link_name == self.parent_interface {
            return Err(Error::invalid_config(
                "link name must differ from the parent interface",
            ));
        }

        if !(0.0..=100.0).contains(&self.shaping.loss) {
            return Err(Error::invalid_config(format!(
                "loss must be within 0-100%, got {}",
                self.shaping.loss
            )));
        }

        if self
            .netns_path
            .parent()
            .is_none_or(|p| p.as_os_str().is_empty())
        {
            return Err(Error::invalid_config(format!(
                "namespace path {} has no parent directory",
                self.netns_path.display()
            )));
        }

        Ok(())
    }
}
