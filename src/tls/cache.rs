//! Per-domain leaf certificates: memory first, then disk, then the issuer

use rsa::RsaPrivateKey;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::ca::CertificateAuthority;
use super::domain::normalize_domain;
use super::issuer::issue_leaf;
use super::keys;
use super::store::{CertificateStore, PairPaths, StoredPair};
use super::x509::{decode_certificate_pem, verify_issued_by, CertInfo};
use crate::config::LockScope;
use crate::error::{Error, Result};

/// A leaf ready to be handed to rustls.
pub struct LeafCertificate {
    domain: String,
    cert_der: CertificateDer<'static>,
    info: CertInfo,
    certified_key: Arc<CertifiedKey>,
}

impl std::fmt::Debug for LeafCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCertificate")
            .field("domain", &self.domain)
            .field("serial", &self.info.serial)
            .field("not_after", &self.info.not_after)
            .finish()
    }
}

impl LeafCertificate {
    /// Pair `cert_der` with `key` and chain it to `ca`.
    fn new(
        domain: &str,
        cert_der: CertificateDer<'static>,
        key: &RsaPrivateKey,
        ca: &CertificateAuthority,
    ) -> Result<Self> {
        let info = CertInfo::from_der(&cert_der)?;
        if !info.matches_key(key) {
            return Err(Error::crypto("private key does not match certificate"));
        }

        let key_der = keys::private_key_der(key)?;
        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)
            .map_err(|e| Error::tls(format!("Unusable private key: {}", e)))?;
        let chain = vec![cert_der.clone(), ca.cert_der().clone()];

        Ok(Self {
            domain: domain.to_string(),
            cert_der,
            info,
            certified_key: Arc::new(CertifiedKey::new(chain, signing_key)),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn info(&self) -> &CertInfo {
        &self.info
    }

    /// Hex serial number, unique per issuance
    pub fn serial(&self) -> &str {
        &self.info.serial
    }

    /// Chain `[leaf, CA]` plus signing key
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified_key.clone()
    }

    pub fn is_expired(&self) -> bool {
        self.info.is_expired()
    }
}

/// Serves each domain's leaf, issuing at most once per domain.
///
/// Lookup order is memory, then `<domain>-cert.pem`/`<domain>-key.pem` in the
/// store, then a fresh issuance that is written back to the store. The whole
/// sequence runs under the gate selected by [`LockScope`].
pub struct CertificateCache {
    ca: Arc<CertificateAuthority>,
    store: CertificateStore,
    lock_scope: LockScope,
    reissue_expired: bool,
    entries: Mutex<HashMap<String, Arc<LeafCertificate>>>,
    global_gate: Mutex<()>,
    domain_gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    issued: AtomicUsize,
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("root", &self.store.root())
            .field("lock_scope", &self.lock_scope)
            .field("cached", &self.len())
            .field("issued", &self.issued_count())
            .finish()
    }
}

impl CertificateCache {
    pub fn new(
        ca: Arc<CertificateAuthority>,
        store: CertificateStore,
        lock_scope: LockScope,
        reissue_expired: bool,
    ) -> Self {
        Self {
            ca,
            store,
            lock_scope,
            reissue_expired,
            entries: Mutex::new(HashMap::new()),
            global_gate: Mutex::new(()),
            domain_gates: Mutex::new(HashMap::new()),
            issued: AtomicUsize::new(0),
        }
    }

    /// Return the leaf for `domain`, loading or issuing it if needed.
    ///
    /// Every failure is reported as [`Error::Issuance`] naming the domain.
    pub fn get_or_issue(&self, domain: &str) -> Result<Arc<LeafCertificate>> {
        let normalized = normalize_domain(domain).map_err(|e| Error::issuance(domain, e))?;
        self.serialized(&normalized, || self.lookup_or_issue(&normalized))
            .map_err(|e| Error::issuance(&normalized, e))
    }

    fn serialized<T>(&self, domain: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match self.lock_scope {
            LockScope::Global => {
                let _guard = lock(&self.global_gate);
                f()
            }
            LockScope::PerDomain => {
                let gate = lock(&self.domain_gates)
                    .entry(domain.to_string())
                    .or_default()
                    .clone();
                let _guard = lock(&gate);
                f()
            }
        }
    }

    fn lookup_or_issue(&self, domain: &str) -> Result<Arc<LeafCertificate>> {
        if let Some(leaf) = self.cached(domain) {
            return Ok(leaf);
        }

        let paths = self.store.leaf_paths(domain);
        if let Some(leaf) = self.load_stored(domain, &paths)? {
            tracing::debug!(domain = %domain, serial = %leaf.serial(), "Loaded certificate from disk");
            return Ok(self.insert(leaf));
        }

        let issued = issue_leaf(domain, &self.ca)?;
        self.store
            .write_pair(&paths, &issued.cert_pem, &issued.key_pem)?;
        self.issued.fetch_add(1, Ordering::SeqCst);

        let leaf = LeafCertificate::new(domain, issued.cert_der, &issued.key, &self.ca)?;
        tracing::info!(
            domain = %domain,
            serial = %leaf.serial(),
            path = %paths.cert.display(),
            "Issued certificate"
        );
        Ok(self.insert(leaf))
    }

    fn cached(&self, domain: &str) -> Option<Arc<LeafCertificate>> {
        let entries = lock(&self.entries);
        let leaf = entries.get(domain)?;
        if self.reissue_expired && leaf.is_expired() {
            tracing::info!(domain = %domain, serial = %leaf.serial(), "Cached certificate expired");
            return None;
        }
        Some(leaf.clone())
    }

    /// `Ok(None)` means the caller should issue: nothing stored, or what is
    /// stored is unusable. Only an unreadable store is an error.
    fn load_stored(&self, domain: &str, paths: &PairPaths) -> Result<Option<LeafCertificate>> {
        let (cert_pem, key_pem) = match self.store.read_pair(paths)? {
            StoredPair::Missing => return Ok(None),
            StoredPair::Partial { missing } => {
                tracing::warn!(
                    domain = %domain,
                    missing = %missing.display(),
                    "Incomplete certificate pair on disk, reissuing"
                );
                return Ok(None);
            }
            StoredPair::Present { cert_pem, key_pem } => (cert_pem, key_pem),
        };

        let leaf = match self.parse_stored(domain, &cert_pem, &key_pem) {
            Ok(leaf) => leaf,
            Err(e) => {
                tracing::warn!(
                    domain = %domain,
                    path = %paths.cert.display(),
                    error = %e,
                    "Stored certificate unusable, reissuing"
                );
                return Ok(None);
            }
        };

        if self.reissue_expired && leaf.is_expired() {
            tracing::info!(
                domain = %domain,
                not_after = %leaf.info.not_after,
                "Stored certificate expired, reissuing"
            );
            return Ok(None);
        }
        Ok(Some(leaf))
    }

    fn parse_stored(&self, domain: &str, cert_pem: &str, key_pem: &str) -> Result<LeafCertificate> {
        let cert_der = decode_certificate_pem(cert_pem)?;
        verify_issued_by(&cert_der, self.ca.cert_der())?;
        let key = keys::decode_private_key_pem(key_pem)?;
        LeafCertificate::new(domain, cert_der, &key, &self.ca)
    }

    fn insert(&self, leaf: LeafCertificate) -> Arc<LeafCertificate> {
        let leaf = Arc::new(leaf);
        lock(&self.entries).insert(leaf.domain.clone(), leaf.clone());
        leaf
    }

    /// Number of domains held in memory
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `domain` is held in memory. Does not touch disk.
    pub fn contains(&self, domain: &str) -> bool {
        match normalize_domain(domain) {
            Ok(domain) => lock(&self.entries).contains_key(&domain),
            Err(_) => false,
        }
    }

    /// Leaves issued (not loaded) by this cache since it was created
    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Get the CA certificate for client trust
    pub fn ca_cert_der(&self) -> &CertificateDer<'static> {
        self.ca.cert_der()
    }

    pub fn ca(&self) -> &Arc<CertificateAuthority> {
        &self.ca
    }

    pub fn store(&self) -> &CertificateStore {
        &self.store
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
