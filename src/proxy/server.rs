//! HTTP and HTTPS listeners plus the route refresh worker

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use rustls::server::Acceptor;
use rustls::ServerConfig;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tokio_rustls::server::TlsStream;
use tokio_rustls::LazyConfigAcceptor;

use super::router::{Router, Scheme};
use crate::config::Config;
use crate::discovery::RouteSource;
use crate::error::{Error, Result};
use crate::tls::{
    config_with_key, CertificateAuthority, CertificateCache, CertificateStore, SniResolver,
};

/// Addresses the server is listening on after `bind()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundAddresses {
    pub http: SocketAddr,
    pub https: SocketAddr,
}

struct BoundListeners {
    http: TcpListener,
    https: TcpListener,
}

/// The router process: two listeners sharing one route table and one
/// certificate cache.
pub struct RouterServer {
    config: Config,
    router: Arc<Router>,
    resolver: Arc<SniResolver>,
    listeners: Option<BoundListeners>,
}

impl RouterServer {
    /// Open the certificate store, load or create the CA and build the server
    pub fn new(config: Config) -> Result<Self> {
        let certs = &config.certificates;
        let store = CertificateStore::open(&certs.storage_dir)?;
        let ca = CertificateAuthority::load_or_create(&store, certs.ca_recovery)?;
        let cache = CertificateCache::new(
            Arc::new(ca),
            store,
            certs.lock_scope,
            certs.reissue_expired,
        );

        tracing::info!(
            storage = %certs.storage_dir.display(),
            lock_scope = ?certs.lock_scope,
            "Certificate cache initialized"
        );

        Ok(Self::with_cache(config, Arc::new(cache)))
    }

    /// Create a server around an existing certificate cache
    pub fn with_cache(config: Config, cache: Arc<CertificateCache>) -> Self {
        let router = Arc::new(Router::new(config.router.backend_port));
        let resolver = Arc::new(SniResolver::new(
            cache,
            config.router.default_domain.clone(),
        ));
        Self {
            config,
            router,
            resolver,
            listeners: None,
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn cache(&self) -> &Arc<CertificateCache> {
        self.resolver.cache()
    }

    /// Run until `shutdown` fires
    pub async fn run_until_shutdown<S>(
        mut self,
        source: S,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()>
    where
        S: RouteSource + 'static,
    {
        let addrs = self.bind().await?;
        tracing::info!(http = %addrs.http, https = %addrs.https, "Router listening");
        self.serve(source, shutdown).await
    }

    /// Bind both listeners and return their local addresses.
    ///
    /// Port 0 is allowed; the returned addresses carry the assigned ports.
    pub async fn bind(&mut self) -> Result<BoundAddresses> {
        let http = bind_listener(self.config.http_addr()?).await?;
        let https = bind_listener(self.config.https_addr()?).await?;

        let addrs = BoundAddresses {
            http: local_addr(&http)?,
            https: local_addr(&https)?,
        };
        self.listeners = Some(BoundListeners { http, https });
        Ok(addrs)
    }

    /// Serve both listeners and refresh routes from `source` until shutdown.
    ///
    /// Must call `bind()` first.
    pub async fn serve<S>(
        mut self,
        source: S,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()>
    where
        S: RouteSource + 'static,
    {
        let listeners = self
            .listeners
            .take()
            .ok_or_else(|| Error::proxy("bind() must be called before serve()"))?;

        let tls_config = Arc::new(self.resolver.clone().server_config()?);

        let refresh = tokio::spawn(refresh_routes(
            source,
            self.router.clone(),
            self.config.discovery.refresh_interval(),
        ));

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    refresh.abort();
                    return Ok(());
                }
                result = listeners.http.accept() => {
                    let (stream, client_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept HTTP connection");
                            continue;
                        }
                    };
                    tracing::debug!(client = %client_addr, "New HTTP connection");
                    self.spawn_connection(stream, client_addr, Scheme::Http);
                }
                result = listeners.https.accept() => {
                    let (stream, client_addr) = match result {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept HTTPS connection");
                            continue;
                        }
                    };
                    tracing::debug!(client = %client_addr, "New HTTPS connection");

                    let tls_config = tls_config.clone();
                    let resolver = self.resolver.clone();
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        match accept_tls(stream, &resolver, &tls_config).await {
                            Ok(tls) => serve_connection(tls, client_addr, Scheme::Https, router).await,
                            Err(e) => {
                                tracing::debug!(client = %client_addr, error = %e, "TLS handshake failed");
                            }
                        }
                    });
                }
            }
        }
    }

    fn spawn_connection<IO>(&self, stream: IO, client_addr: SocketAddr, scheme: Scheme)
    where
        IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let router = self.router.clone();
        tokio::spawn(serve_connection(stream, client_addr, scheme, router));
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::proxy(format!("Failed to bind to {}: {}", addr, e)))
}

fn local_addr(listener: &TcpListener) -> Result<SocketAddr> {
    listener
        .local_addr()
        .map_err(|e| Error::proxy(format!("Failed to get local address: {}", e)))
}

/// Complete a TLS handshake, picking the certificate off the runtime.
///
/// The ClientHello is read first so the server name is known; the leaf is
/// then resolved on the blocking pool and the handshake resumes with it.
async fn accept_tls(
    stream: TcpStream,
    resolver: &Arc<SniResolver>,
    base: &ServerConfig,
) -> std::io::Result<TlsStream<TcpStream>> {
    let start = LazyConfigAcceptor::new(Acceptor::default(), stream).await?;
    let server_name = start.client_hello().server_name().map(String::from);

    let key = match resolver.resolve_blocking(server_name.clone()).await {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::error!(
                server_name = server_name.as_deref().unwrap_or(""),
                error = %e,
                "Certificate resolution failed, aborting handshake"
            );
            None
        }
    };

    start.into_stream(config_with_key(base, key)).await
}

/// Serve HTTP/1.1 or HTTP/2 on one accepted connection.
async fn serve_connection<IO>(stream: IO, client_addr: SocketAddr, scheme: Scheme, router: Arc<Router>)
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let router = router.clone();
        async move { router.handle(req, client_addr, scheme).await }
    });

    if let Err(e) = auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
    {
        let err_str = e.to_string();
        if !err_str.contains("connection closed") {
            tracing::debug!(client = %client_addr, error = %e, "Connection error");
        }
    }
}

/// Fetch routes now and then every `interval`; keep the old table on failure.
async fn refresh_routes<S: RouteSource>(source: S, router: Arc<Router>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match source.fetch_routes().await {
            Ok(routes) => {
                router.set_routes(routes);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Route refresh failed, keeping previous routes");
            }
        }
    }
}
