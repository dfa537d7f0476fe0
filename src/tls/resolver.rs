//! SNI-driven certificate selection for the HTTPS listener

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::sync::Arc;

use super::cache::CertificateCache;
use crate::error::{Error, Result};

/// Picks the leaf for each handshake from the client's server name.
///
/// Clients that send no SNI (or an empty one) get the default domain's
/// certificate. Failures abort the handshake; there is no plaintext fallback.
pub struct SniResolver {
    cache: Arc<CertificateCache>,
    default_domain: String,
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("default_domain", &self.default_domain)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SniResolver {
    pub fn new(cache: Arc<CertificateCache>, default_domain: impl Into<String>) -> Self {
        Self {
            cache,
            default_domain: default_domain.into(),
        }
    }

    pub fn cache(&self) -> &Arc<CertificateCache> {
        &self.cache
    }

    /// Resolve `server_name` the way a handshake would, reporting the error.
    pub fn resolve_name(&self, server_name: Option<&str>) -> Result<Arc<CertifiedKey>> {
        let domain = match server_name {
            Some(name) if !name.trim().is_empty() => name,
            _ => self.default_domain.as_str(),
        };
        Ok(self.cache.get_or_issue(domain)?.certified_key())
    }

    /// [`resolve_name`](Self::resolve_name) on the blocking pool.
    ///
    /// Issuing a leaf generates an RSA key and may wait on the cache gate;
    /// neither may park a runtime worker.
    pub async fn resolve_blocking(
        self: &Arc<Self>,
        server_name: Option<String>,
    ) -> Result<Arc<CertifiedKey>> {
        let resolver = self.clone();
        tokio::task::spawn_blocking(move || resolver.resolve_name(server_name.as_deref()))
            .await
            .map_err(|e| Error::tls(format!("Certificate task failed: {}", e)))?
    }

    /// Build a rustls server config that uses this resolver
    pub fn server_config(self: Arc<Self>) -> Result<ServerConfig> {
        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::tls(format!("Failed to build server config: {}", e)))?
            .with_no_client_auth()
            .with_cert_resolver(self);

        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }
}

/// Copy of `base` that answers every handshake with `key`.
///
/// `None` makes rustls abort the handshake with an alert.
pub fn config_with_key(base: &ServerConfig, key: Option<Arc<CertifiedKey>>) -> Arc<ServerConfig> {
    let mut config = base.clone();
    config.cert_resolver = Arc::new(ResolvedKey(key));
    Arc::new(config)
}

/// A certificate chosen before the handshake continues.
#[derive(Debug)]
struct ResolvedKey(Option<Arc<CertifiedKey>>);

impl ResolvesServerCert for ResolvedKey {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.0.clone()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name();
        match self.resolve_name(server_name) {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::error!(
                    server_name = server_name.unwrap_or(""),
                    error = %e,
                    "Certificate resolution failed, aborting handshake"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CaRecovery, LockScope};
    use crate::test_report;
    use crate::tls::{CertificateAuthority, CertificateStore};

    fn test_resolver(dir: &std::path::Path) -> Arc<SniResolver> {
        let store = CertificateStore::open(dir).unwrap();
        let ca = CertificateAuthority::load_or_create(&store, CaRecovery::Fail).unwrap();
        let cache = CertificateCache::new(Arc::new(ca), store, LockScope::Global, true);
        Arc::new(SniResolver::new(Arc::new(cache), "localhost"))
    }

    #[test]
    fn test_missing_name_uses_default() {
        let t = test_report!("Absent and empty server names resolve to localhost");
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());

        resolver.resolve_name(None).unwrap();
        resolver.resolve_name(Some("")).unwrap();
        t.assert_true("localhost cached", resolver.cache().contains("localhost"));
        t.assert_eq("one leaf", &resolver.cache().len(), &1usize);
        t.assert_true(
            "files written",
            dir.path().join("localhost-cert.pem").exists(),
        );
    }

    #[test]
    fn test_invalid_name_fails() {
        let t = test_report!("Unusable server name yields an error");
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        t.assert_true("error", resolver.resolve_name(Some("a/b")).is_err());
    }

    #[tokio::test]
    async fn test_resolve_blocking_matches_sync_path() {
        let t = test_report!("Off-runtime resolution fills the same cache");
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());

        let key = resolver
            .resolve_blocking(Some("pool.test".to_string()))
            .await
            .unwrap();
        let again = resolver.resolve_name(Some("pool.test")).unwrap();
        t.assert_true("same key", Arc::ptr_eq(&key, &again));
        t.assert_eq("one issuance", &resolver.cache().issued_count(), &1usize);

        let err = resolver.resolve_blocking(Some("a/b".to_string())).await;
        t.assert_true("invalid name fails", err.is_err());
    }

    #[test]
    fn test_config_with_key_keeps_alpn() {
        let t = test_report!("Per-handshake config keeps the base settings");
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let base = resolver.clone().server_config().unwrap();
        let key = resolver.resolve_name(Some("fixed.test")).unwrap();

        let config = config_with_key(&base, Some(key));
        t.assert_eq("ALPN", &config.alpn_protocols, &base.alpn_protocols);
    }

    #[test]
    fn test_server_config() {
        let t = test_report!("Server config has h2+h1 ALPN");
        let dir = tempfile::tempdir().unwrap();
        let config = test_resolver(dir.path()).server_config().unwrap();

        t.assert_eq(
            "ALPN protocols",
            &config.alpn_protocols,
            &vec![b"h2".to_vec(), b"http/1.1".to_vec()],
        );
    }
}
