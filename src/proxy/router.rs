//! Host-based request routing to discovered backends

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{PoisonError, RwLock};
use tokio::net::TcpStream;

use super::response::{bad_gateway_response, not_found_response};
use crate::discovery::RouteTable;

/// Hop-by-hop headers that must not be forwarded (RFC 7230 §6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Listener a request arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Shared route table plus the forwarding logic that reads it.
#[derive(Debug)]
pub struct Router {
    routes: RwLock<RouteTable>,
    backend_port: u16,
}

impl Router {
    pub fn new(backend_port: u16) -> Self {
        Self {
            routes: RwLock::new(RouteTable::new()),
            backend_port,
        }
    }

    /// Replace the table. Returns `false` when `routes` equals the current one.
    pub fn set_routes(&self, routes: RouteTable) -> bool {
        {
            let current = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            if *current == routes {
                return false;
            }
        }

        let count = routes.len();
        *self.routes.write().unwrap_or_else(PoisonError::into_inner) = routes;
        tracing::info!(routes = count, "Route table updated");
        true
    }

    /// Snapshot of the current table
    pub fn routes(&self) -> RouteTable {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn backend_port(&self) -> u16 {
        self.backend_port
    }

    /// Backend address for a `Host` value, ignoring any port and case.
    pub fn resolve(&self, host: &str) -> Option<String> {
        let host = strip_port(host.trim()).to_ascii_lowercase();
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&host)
            .cloned()
    }

    /// Handle one request from a client connection
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        client_addr: SocketAddr,
        scheme: Scheme,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let host = match request_host(&req) {
            Some(host) => host,
            None => {
                tracing::debug!(client = %client_addr, "Request without host");
                return Ok(not_found_response());
            }
        };

        let backend = match self.resolve(&host) {
            Some(addr) => addr,
            None => {
                tracing::debug!(host = %host, "No route for host");
                return Ok(not_found_response());
            }
        };

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        match forward_request(&backend, self.backend_port, &host, req, client_addr, scheme).await {
            Ok(resp) => {
                tracing::debug!(
                    host = %host,
                    method = %method,
                    path = %path,
                    status = resp.status().as_u16(),
                    "Forwarded request"
                );
                Ok(resp)
            }
            Err(e) => {
                tracing::warn!(
                    host = %host,
                    backend = %backend,
                    port = self.backend_port,
                    error = %e,
                    "Backend request failed"
                );
                Ok(bad_gateway_response(&e.to_string()))
            }
        }
    }
}

/// `Host` header, or the URI authority for HTTP/2 requests.
fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
        .filter(|host| !host.trim().is_empty())
}

/// Drop a `:port` suffix, leaving bracketed IPv6 literals intact.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name)
}

/// Forward a request to `http://<backend>:<port>` keeping the client's Host.
async fn forward_request(
    backend: &str,
    port: u16,
    host: &str,
    req: Request<Incoming>,
    client_addr: SocketAddr,
    scheme: Scheme,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", backend, port);
    let tcp = TcpStream::connect(&addr).await?;
    let io = TokioIo::new(tcp);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            let err_str = e.to_string();
            if !err_str.contains("connection closed") && !err_str.contains("early eof") {
                tracing::error!(error = %e, "Backend connection error");
            }
        }
    });

    let (parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_uri: hyper::Uri = path_and_query.parse()?;

    let mut builder = Request::builder().method(parts.method).uri(upstream_uri);

    for (name, value) in &parts.headers {
        if !is_hop_by_hop(name.as_str()) && name.as_str() != X_FORWARDED_PROTO {
            builder = builder.header(name, value);
        }
    }

    if !parts.headers.contains_key(HOST) {
        builder = builder.header(HOST, host);
    }

    let client_ip = client_addr.ip().to_string();
    let forwarded_for = match parts
        .headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };
    if let Some(headers) = builder.headers_mut() {
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&forwarded_for)?);
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(scheme.as_str()));
    }

    let upstream_req = builder.body(body)?;
    let mut resp = sender.send_request(upstream_req).await?;

    let headers = resp.headers_mut();
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }

    Ok(resp.map(|b| b.boxed()))
}
