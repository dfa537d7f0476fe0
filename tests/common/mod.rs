//! Test infrastructure for router and certificate tests.
#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use local_router::config::{CaRecovery, LockScope};
use local_router::tls::{CertificateAuthority, CertificateCache, CertificateStore};
use local_router::{Config, RouteTable, RouterServer, StaticRouteSource};
use rustls::pki_types::CertificateDer;
use rustls::ClientConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

// ---------------------------------------------------------------------------
// Certificate helpers
// ---------------------------------------------------------------------------

/// Open a store and cache over `dir`, creating the CA on first use.
pub fn open_cache(dir: &Path, lock_scope: LockScope) -> Arc<CertificateCache> {
    install_crypto_provider();
    let store = CertificateStore::open(dir).unwrap();
    let ca = CertificateAuthority::load_or_create(&store, CaRecovery::Fail).unwrap();
    Arc::new(CertificateCache::new(Arc::new(ca), store, lock_scope, true))
}

/// Build a rustls ClientConfig that trusts `ca_der` (with h2 + h1 ALPN).
pub fn client_tls_config(ca_der: &CertificateDer<'static>) -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.add(ca_der.clone()).unwrap();
    let mut config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(root_store)
    .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    config
}

// ---------------------------------------------------------------------------
// TestBackend - a plain HTTP server standing in for a container
// ---------------------------------------------------------------------------

/// A plain HTTP backend that echoes request details back.
pub struct TestBackend {
    pub addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestBackend {
    pub async fn start(name: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = listener.accept() => {
                        let (stream, _) = match result {
                            Ok(conn) => conn,
                            Err(_) => continue,
                        };
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| echo(name, req));
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                }
            }
        });

        Self { addr, shutdown_tx }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn echo(
    name: &'static str,
    req: Request<Incoming>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let mut lines = vec![
        format!("backend={}", name),
        format!("method={}", req.method()),
        format!(
            "path={}",
            req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        ),
    ];
    for (header, value) in req.headers() {
        lines.push(format!("{}: {}", header, value.to_str().unwrap_or("?")));
    }
    let body = req.into_body().collect().await?.to_bytes();
    lines.push(format!("body={}", String::from_utf8_lossy(&body)));

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .body(
            Full::new(Bytes::from(lines.join("\n")))
                .map_err(|e| match e {})
                .boxed(),
        )
        .unwrap())
}

// ---------------------------------------------------------------------------
// TestRouter - RouterServer bound to ephemeral ports
// ---------------------------------------------------------------------------

pub struct TestRouter {
    pub http: SocketAddr,
    pub https: SocketAddr,
    pub cache: Arc<CertificateCache>,
    pub storage: TempDir,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<local_router::Result<()>>,
}

impl TestRouter {
    /// Start a router whose hosts all point at 127.0.0.1:`backend_port`.
    pub async fn start(backend_port: u16, hosts: &[&str]) -> Self {
        install_crypto_provider();
        let storage = tempfile::tempdir().unwrap();

        let mut config = Config::local(storage.path());
        config.router.backend_port = backend_port;

        let routes: RouteTable = hosts
            .iter()
            .map(|h| (h.to_string(), "127.0.0.1".to_string()))
            .collect();

        let mut server = RouterServer::new(config).unwrap();
        let cache = server.cache().clone();
        let router = server.router().clone();
        let addrs = server.bind().await.unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(server.serve(StaticRouteSource::new(routes), shutdown_rx));

        // The first refresh runs as soon as serve() starts.
        for _ in 0..200 {
            if router.routes().len() == hosts.len() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        Self {
            http: addrs.http,
            https: addrs.https,
            cache,
            storage,
            shutdown_tx,
            handle,
        }
    }

    pub fn ca_pem(&self) -> &str {
        self.cache.ca().cert_pem()
    }

    pub fn ca_der(&self) -> &CertificateDer<'static> {
        self.cache.ca_cert_der()
    }

    /// Stop the server and wait for `serve()` to return.
    pub async fn shutdown(self) -> local_router::Result<()> {
        let _ = self.shutdown_tx.send(());
        self.handle.await.unwrap()
    }
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

/// reqwest client that trusts the router's CA and sends `host` to `addr`.
pub fn https_client(router: &TestRouter, host: &str) -> reqwest::Client {
    let ca_cert = reqwest::tls::Certificate::from_pem(router.ca_pem().as_bytes()).unwrap();
    reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(ca_cert)
        .resolve(host, router.https)
        .no_proxy()
        .build()
        .unwrap()
}

/// reqwest client for the plain HTTP listener.
pub fn http_client(router: &TestRouter, host: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .resolve(host, router.http)
        .no_proxy()
        .build()
        .unwrap()
}
