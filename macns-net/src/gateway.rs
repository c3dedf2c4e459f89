//! Default gateway discovery

use std::net::IpAddr;
use tracing::debug;

use macns_core::{Error, Result};

use crate::backend::{NetlinkBackend, RouteEntry};

/// First gateway among `routes`, in table order
#[must_use]
pub fn select_gateway(routes: &[RouteEntry]) -> Option<IpAddr> {
    routes.iter().find_map(|route| route.gateway)
}

/// Find the gateway of `interface` from its IPv4 routes
///
/// Must run in the namespace owning `interface`, before the target
/// namespace is entered.
///
/// # Errors
/// Returns [`Error::NoDefaultGateway`] if no route carries a gateway
pub async fn detect_gateway(backend: &dyn NetlinkBackend, interface: &str) -> Result<IpAddr> {
    let routes = backend.routes(interface).await?;
    let gateway = select_gateway(&routes).ok_or_else(|| Error::NoDefaultGateway {
        interface: interface.to_string(),
    })?;

    debug!(interface, %gateway, routes = routes.len(), "Detected gateway");
    Ok(gateway)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockNetlink;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_first_gateway_wins() {
        let backend = MockNetlink::new().with_routes(
            "eth0",
            vec![
                RouteEntry::via("default", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
                RouteEntry::direct("192.168.0.0/24"),
            ],
        );

        let gateway = detect_gateway(&backend, "eth0").await.unwrap();
        assert_eq!(gateway, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn test_gateway_after_direct_routes() {
        let backend = MockNetlink::new().with_routes(
            "eth0",
            vec![
                RouteEntry::direct("192.168.0.0/24"),
                RouteEntry::via("default", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254))),
                RouteEntry::via("default", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            ],
        );

        let gateway = detect_gateway(&backend, "eth0").await.unwrap();
        assert_eq!(gateway, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 254)));
    }

    #[tokio::test]
    async fn test_no_gateway() {
        let backend =
            MockNetlink::new().with_routes("eth0", vec![RouteEntry::direct("192.168.0.0/24")]);

        let result = detect_gateway(&backend, "eth0").await;
        assert!(matches!(
            result,
            Err(Error::NoDefaultGateway { ref interface }) if interface == "eth0"
        ));
    }

    #[tokio::test]
    async fn test_no_routes_at_all() {
        let backend = MockNetlink::new();
        assert!(detect_gateway(&backend, "eth0").await.is_err());
    }
}
