//! IPv4-only DNS resolution.
//!
//! Some deployment networks advertise AAAA records for the portal that are
//! unreachable from the runner; forcing A records sidesteps the long IPv6
//! connect timeouts. Enabled via `FORCE_IPV4`.

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;

/// Resolver that keeps only IPv4 addresses from system lookups.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ipv4OnlyResolver;

impl Resolve for Ipv4OnlyResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((name.as_str(), 0)).await?;
            let v4: Vec<SocketAddr> = addrs.filter(|addr| addr.is_ipv4()).collect();
            let iter: Addrs = Box::new(v4.into_iter());
            Ok(iter)
        })
    }
}
