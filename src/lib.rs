//! local-router - HTTPS for local development containers
//!
//! Discovers containers through the Docker Engine API, routes requests to
//! them by hostname and terminates TLS with certificates issued on demand by
//! a local root CA.
//!
//! # Features
//!
//! - **Local CA**: a self-signed root created once per storage directory
//! - **Just-in-time leaves**: one certificate per domain, issued on the first
//!   handshake and persisted for later runs
//! - **Docker discovery**: containers labelled with a hostname become routes
//! - **HTTP and HTTPS listeners** sharing one route table
//!
//! # Example
//!
//! ```no_run
//! use local_router::{Config, DockerRouteSource, RouterServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("local-router.toml")?;
//!     let source = DockerRouteSource::new(&config.discovery.docker_socket, &config.discovery.label);
//!     let server = RouterServer::new(config)?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
//!     server.run_until_shutdown(source, shutdown_rx).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod proxy;
#[doc(hidden)]
pub mod test_support;
pub mod tls;

pub use config::Config;
pub use discovery::{DockerRouteSource, RouteSource, RouteTable, StaticRouteSource};
pub use error::{Error, Result};
pub use proxy::{BoundAddresses, Router, RouterServer};
pub use tls::{CertificateAuthority, CertificateCache, CertificateStore, SniResolver};
