//! Certificate Authority management

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use rustls::pki_types::CertificateDer;

use super::keys;
use super::store::{CertificateStore, StoredPair};
use super::x509::{decode_certificate_pem, CertInfo};
use crate::config::CaRecovery;
use crate::error::{Error, Result};

pub const CA_COMMON_NAME: &str = "Local Router Development CA";
pub const CA_ORG_NAME: &str = "Local Router";

/// Root validity: ten years.
pub const CA_VALIDITY_DAYS: i64 = 3650;

/// A freshly generated root certificate and key, not yet persisted
pub struct GeneratedCa {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded PKCS#1 private key
    pub key_pem: String,
}

impl GeneratedCa {
    /// Generate a new self-signed root with serial number 1
    pub fn generate() -> Result<Self> {
        let mut params = CertificateParams::default();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, CA_COMMON_NAME);
        distinguished_name.push(DnType::OrganizationName, CA_ORG_NAME);
        params.distinguished_name = distinguished_name;

        params.serial_number = Some(SerialNumber::from_slice(&[1]));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];

        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = params.not_before + time::Duration::days(CA_VALIDITY_DAYS);

        let key = keys::generate_rsa_key()?;
        let key_pair = keys::signing_key_pair(&key)?;
        let cert = params.self_signed(&key_pair)?;

        Ok(Self {
            cert_pem: cert.pem(),
            key_pem: keys::encode_private_key_pem(&key)?,
        })
    }
}

/// The loaded root used to sign every leaf certificate
pub struct CertificateAuthority {
    cert_pem: String,
    key_pem: String,
    cert_der: CertificateDer<'static>,
    info: CertInfo,
    key_pair: KeyPair,
    /// Re-materialized from the stored certificate so leaves carry its exact subject.
    issuer: Certificate,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("subject", &self.info.subject)
            .field("serial", &self.info.serial)
            .field("not_after", &self.info.not_after)
            .finish()
    }
}

impl CertificateAuthority {
    /// Load a CA from a PEM certificate and PEM private key.
    ///
    /// Fails unless the certificate is a CA and the key is its private half.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let cert_der = decode_certificate_pem(cert_pem)?;
        let info = CertInfo::from_der(&cert_der)?;
        if !info.is_ca {
            return Err(Error::decode("Certificate is not a CA certificate"));
        }

        let key = keys::decode_private_key_pem(key_pem)?;
        if !info.matches_key(&key) {
            return Err(Error::crypto("CA private key does not match CA certificate"));
        }

        let key_pair = keys::signing_key_pair(&key)?;
        let issuer = CertificateParams::from_ca_cert_pem(cert_pem)?.self_signed(&key_pair)?;

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            key_pem: key_pem.to_string(),
            cert_der,
            info,
            key_pair,
            issuer,
        })
    }

    /// Load the CA from `store`, or generate and persist one if none exists.
    ///
    /// When files exist but cannot be loaded, `recovery` decides between
    /// failing with [`Error::CaCorrupt`] and minting a replacement root.
    pub fn load_or_create(store: &CertificateStore, recovery: CaRecovery) -> Result<Self> {
        let paths = store.ca_paths();

        let reason = match store.read_pair(&paths)? {
            StoredPair::Missing => {
                tracing::info!(dir = %store.root().display(), "No CA found, generating a new root");
                return Self::create(store);
            }
            StoredPair::Partial { missing } => format!("'{}' is missing", missing.display()),
            StoredPair::Present { cert_pem, key_pem } => match Self::from_pem(&cert_pem, &key_pem) {
                Ok(ca) => {
                    tracing::info!(
                        path = %paths.cert.display(),
                        serial = %ca.info.serial,
                        "Loaded CA"
                    );
                    return Ok(ca);
                }
                Err(e) => e.to_string(),
            },
        };

        match recovery {
            CaRecovery::Fail => Err(Error::ca_corrupt(store.root(), reason)),
            CaRecovery::Regenerate => {
                tracing::warn!(
                    dir = %store.root().display(),
                    reason = %reason,
                    "CA unreadable, minting a new root; previously trusted leaves will no longer verify"
                );
                Self::create(store)
            }
        }
    }

    fn create(store: &CertificateStore) -> Result<Self> {
        let generated = GeneratedCa::generate()?;
        let paths = store.ca_paths();
        store.write_pair(&paths, &generated.cert_pem, &generated.key_pem)?;
        tracing::info!(path = %paths.cert.display(), "Wrote new CA certificate");
        Self::from_pem(&generated.cert_pem, &generated.key_pem)
    }

    /// PEM certificate exactly as stored on disk
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// PEM private key exactly as stored on disk
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Get the CA certificate in DER format
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn info(&self) -> &CertInfo {
        &self.info
    }

    pub(crate) fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub(crate) fn issuer(&self) -> &Certificate {
        &self.issuer
    }
}
