//! Backend discovery: where each routed hostname lives

mod docker;

use std::collections::HashMap;
use std::future::Future;

use crate::error::{Error, Result};

pub use docker::{
    parse_containers, routes_from_containers, ContainerSummary, DockerRouteSource,
    EndpointSettings, NetworkSettings,
};

/// Lowercase hostname to backend IP address.
pub type RouteTable = HashMap<String, String>;

/// Anything that can produce the current route table.
pub trait RouteSource: Send + Sync {
    fn fetch_routes(&self) -> impl Future<Output = Result<RouteTable>> + Send;
}

/// A fixed table, for tests and `--route` overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticRouteSource {
    routes: RouteTable,
}

impl StaticRouteSource {
    pub fn new(routes: RouteTable) -> Self {
        let routes = routes
            .into_iter()
            .map(|(host, addr)| (host.to_ascii_lowercase(), addr))
            .collect();
        Self { routes }
    }
}

impl RouteSource for StaticRouteSource {
    async fn fetch_routes(&self) -> Result<RouteTable> {
        Ok(self.routes.clone())
    }
}

/// Parse a `host=address` route override.
pub fn parse_route(entry: &str) -> Result<(String, String)> {
    let (host, addr) = entry
        .split_once('=')
        .ok_or_else(|| Error::config(format!("Route '{}' is not in host=address form", entry)))?;
    let (host, addr) = (host.trim(), addr.trim());
    if host.is_empty() || addr.is_empty() {
        return Err(Error::config(format!(
            "Route '{}' has an empty host or address",
            entry
        )));
    }
    Ok((host.to_ascii_lowercase(), addr.to_string()))
}
