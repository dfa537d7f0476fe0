//! Route discovery from the Docker Engine API

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

use super::{RouteSource, RouteTable};
use crate::error::{Error, Result};

const CONTAINERS_PATH: &str = "/containers/json";

/// The subset of `GET /containers/json` entries used for routing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub labels: Option<HashMap<String, String>>,
    #[serde(default)]
    pub network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// Keyed by network name; ordered so "first network" is stable.
    #[serde(default)]
    pub networks: Option<BTreeMap<String, EndpointSettings>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

impl ContainerSummary {
    fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(name))
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Address on the first network (by name) that has one.
    fn first_address(&self) -> Option<&str> {
        self.network_settings
            .as_ref()?
            .networks
            .as_ref()?
            .values()
            .map(|endpoint| endpoint.ip_address.as_str())
            .find(|ip| !ip.is_empty())
    }
}

/// Decode a `/containers/json` response body.
pub fn parse_containers(body: &[u8]) -> Result<Vec<ContainerSummary>> {
    serde_json::from_slice(body)
        .map_err(|e| Error::discovery(format!("Invalid container list from Docker: {}", e)))
}

/// Build the route table: lowercase `label` value to container address.
///
/// Containers without the label, or with no addressed network, are skipped.
pub fn routes_from_containers(containers: &[ContainerSummary], label: &str) -> RouteTable {
    let mut routes = RouteTable::new();
    for container in containers {
        let Some(host) = container.label(label) else {
            continue;
        };
        match container.first_address() {
            Some(addr) => {
                routes.insert(host.trim().to_ascii_lowercase(), addr.to_string());
            }
            None => {
                tracing::debug!(container = %container.id, host = %host, "Labelled container has no network address");
            }
        }
    }
    routes
}

/// Lists running containers over the Docker Unix socket.
#[derive(Debug, Clone)]
pub struct DockerRouteSource {
    socket: PathBuf,
    label: String,
}

impl DockerRouteSource {
    pub fn new(socket: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            socket: socket.into(),
            label: label.into(),
        }
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            Error::discovery(format!(
                "Failed to connect to Docker at '{}': {}",
                self.socket.display(),
                e
            ))
        })?;
        let io = TokioIo::new(stream);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| Error::discovery(format!("Docker handshake failed: {}", e)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "Docker connection closed with error");
            }
        });

        let req = Request::builder()
            .method(Method::GET)
            .uri(CONTAINERS_PATH)
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| Error::discovery(format!("Failed to build Docker request: {}", e)))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| Error::discovery(format!("Docker request failed: {}", e)))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::discovery(format!("Failed to read Docker response: {}", e)))?
            .to_bytes();

        if !status.is_success() {
            return Err(Error::discovery(format!(
                "Docker returned {} for {}: {}",
                status,
                CONTAINERS_PATH,
                String::from_utf8_lossy(&body).trim()
            )));
        }

        parse_containers(&body)
    }
}

impl RouteSource for DockerRouteSource {
    async fn fetch_routes(&self) -> Result<RouteTable> {
        let containers = self.list_containers().await?;
        let routes = routes_from_containers(&containers, &self.label);
        tracing::debug!(
            containers = containers.len(),
            routes = routes.len(),
            "Listed Docker containers"
        );
        Ok(routes)
    }
}
