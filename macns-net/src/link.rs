//! Macvlan provisioning in the original namespace

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use macns_core::{MacAddress, Result};

use crate::backend::{LinkInfo, NetlinkBackend};

/// Creates the macvlan next to its parent and hands it over to the target namespace
///
/// Must run while the calling thread is in the namespace that owns the
/// parent interface. Once [`reparent`](Self::reparent) succeeds the link
/// lives and dies with the target namespace.
pub struct LinkProvisioner {
    backend: Arc<dyn NetlinkBackend>,
}

impl LinkProvisioner {
    /// Create a provisioner over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn NetlinkBackend>) -> Self {
        Self { backend }
    }

    /// Resolve the parent interface
    pub async fn parent(&self, name: &str) -> Result<LinkInfo> {
        let parent = self.backend.link_by_name(name).await?;
        debug!(
            name = %parent.name,
            index = parent.index,
            flags = %parent.flags.join(","),
            "Resolved parent interface"
        );
        Ok(parent)
    }

    /// Create a bridge-mode macvlan called `name` on `parent`
    ///
    /// The device is read back by name afterwards since creation does not
    /// report the kernel index.
    pub async fn create_macvlan(&self, name: &str, parent: &LinkInfo) -> Result<LinkInfo> {
        self.backend.add_macvlan(name, parent).await?;
        let link = self.backend.link_by_name(name).await?;
        info!(name = %link.name, index = link.index, parent = %parent.name, "Macvlan ready");
        Ok(link)
    }

    /// Apply a MAC override; no-op when `mac` is `None`
    pub async fn set_mac_address(&self, link: &LinkInfo, mac: Option<&str>) -> Result<()> {
        let Some(mac) = mac else {
            return Ok(());
        };
        let mac: MacAddress = mac.parse()?;
        self.backend.set_mac(link, mac).await?;
        debug!(name = %link.name, %mac, "Set MAC address");
        Ok(())
    }

    /// Apply an MTU override; no-op when unset or zero
    pub async fn set_mtu(&self, link: &LinkInfo, mtu: Option<u32>) -> Result<()> {
        match mtu {
            Some(mtu) if mtu > 0 => {
                self.backend.set_mtu(link, mtu).await?;
                debug!(name = %link.name, mtu, "Set MTU");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Move the link into the namespace bind-mounted at `netns`
    ///
    /// Must be called from the namespace currently owning the link.
    pub async fn reparent(&self, link: &LinkInfo, netns: &Path) -> Result<()> {
        self.backend.set_netns(link, netns).await?;
        info!(name = %link.name, netns = %netns.display(), "Moved link into namespace");
        Ok(())
    }

    /// Delete a link that was never handed to a namespace
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.backend.delete_link(name).await?;
        info!(name, "Deleted abandoned link");
        Ok(())
    }
}

impl std::fmt::Debug for LinkProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkProvisioner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockNetlink;
    use macns_core::Error;

    fn provisioner(backend: &MockNetlink) -> LinkProvisioner {
        LinkProvisioner::new(Arc::new(backend.clone()))
    }

    #[tokio::test]
    async fn test_create_looks_link_back_up() {
        let backend = MockNetlink::new().with_link("eth0", 2);
        let links = provisioner(&backend);

        let parent = links.parent("eth0").await.unwrap();
        let link = links.create_macvlan("peth0", &parent).await.unwrap();

        assert_eq!(link.name, "peth0");
        assert!(link.index > 0);
        assert_eq!(backend.log().position("link:add"), Some(1));
        assert_eq!(backend.log().count("link:lookup peth0"), 1);
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let backend = MockNetlink::new();
        let result = provisioner(&backend).parent("eth9").await;
        assert!(matches!(result, Err(Error::LinkLookup { .. })));
    }

    #[tokio::test]
    async fn test_overrides_are_optional() {
        let backend = MockNetlink::new().with_link("eth0", 2);
        let links = provisioner(&backend);
        let parent = links.parent("eth0").await.unwrap();
        let link = links.create_macvlan("peth0", &parent).await.unwrap();

        links.set_mac_address(&link, None).await.unwrap();
        links.set_mtu(&link, None).await.unwrap();
        links.set_mtu(&link, Some(0)).await.unwrap();
        assert_eq!(backend.log().count("link:mac"), 0);
        assert_eq!(backend.log().count("link:mtu"), 0);

        links
            .set_mac_address(&link, Some("02:00:00:00:00:01"))
            .await
            .unwrap();
        links.set_mtu(&link, Some(1400)).await.unwrap();

        let updated = backend.link("peth0").await.unwrap();
        assert_eq!(updated.address.as_deref(), Some("02:00:00:00:00:01"));
        assert_eq!(updated.mtu, Some(1400));
    }

    #[tokio::test]
    async fn test_bad_mac_is_rejected_before_backend() {
        let backend = MockNetlink::new().with_link("eth0", 2);
        let links = provisioner(&backend);
        let parent = links.parent("eth0").await.unwrap();

        let result = links.set_mac_address(&parent, Some("not-a-mac")).await;
        assert!(matches!(result, Err(Error::MacParse { .. })));
        assert_eq!(backend.log().count("link:mac"), 0);
    }

    #[tokio::test]
    async fn test_reparent_records_namespace() {
        let backend = MockNetlink::new().with_link("eth0", 2);
        let links = provisioner(&backend);
        let parent = links.parent("eth0").await.unwrap();
        let link = links.create_macvlan("peth0", &parent).await.unwrap();

        links
            .reparent(&link, Path::new("/var/run/netns/w000t1"))
            .await
            .unwrap();
        assert_eq!(
            backend.reparented_to("peth0").await.as_deref(),
            Some(Path::new("/var/run/netns/w000t1"))
        );
    }
}
