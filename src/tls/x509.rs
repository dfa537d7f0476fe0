//! X.509 inspection of issued and loaded certificates.

use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use rustls::pki_types::CertificateDer;
use std::io::BufReader;
use ::time::OffsetDateTime;
use x509_parser::prelude::*;

use crate::error::{Error, Result};

/// Decode the first `CERTIFICATE` block of a PEM document.
pub fn decode_certificate_pem(pem: &str) -> Result<CertificateDer<'static>> {
    let mut reader = BufReader::new(pem.as_bytes());
    let first = rustls_pemfile::certs(&mut reader).next();
    first
        .ok_or_else(|| Error::decode("No certificate found in PEM"))?
        .map_err(|e| Error::decode(format!("Malformed certificate PEM: {}", e)))
}

/// Check that `issuer_der` signed `cert_der`.
pub fn verify_issued_by(cert_der: &[u8], issuer_der: &[u8]) -> Result<()> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::decode(format!("Invalid X.509 certificate: {}", e)))?;
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| Error::decode(format!("Invalid issuer certificate: {}", e)))?;
    cert.verify_signature(Some(issuer.public_key()))
        .map_err(|e| Error::crypto(format!("Not signed by the current CA: {}", e)))
}

/// The fields of a certificate this crate cares about.
#[derive(Debug, Clone)]
pub struct CertInfo {
    /// Serial number as lowercase hex without leading zeros
    pub serial: String,
    pub common_name: Option<String>,
    pub subject: String,
    pub issuer: String,
    pub dns_names: Vec<String>,
    pub is_ca: bool,
    pub server_auth: bool,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    rsa_modulus: Option<Vec<u8>>,
}

impl CertInfo {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = decode_certificate_pem(pem)?;
        Self::from_der(&der)
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::decode(format!("Invalid X.509 certificate: {}", e)))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(String::from);

        let mut dns_names = Vec::new();
        let mut is_ca = false;
        let mut server_auth = false;
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => {
                    for name in &san.general_names {
                        if let GeneralName::DNSName(dns) = name {
                            dns_names.push(dns.to_string());
                        }
                    }
                }
                ParsedExtension::BasicConstraints(bc) => is_ca = bc.ca,
                ParsedExtension::ExtendedKeyUsage(eku) => server_auth = eku.server_auth,
                _ => {}
            }
        }

        let rsa_modulus = match cert.public_key().parsed() {
            Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => {
                Some(strip_leading_zeros(rsa.modulus).to_vec())
            }
            _ => None,
        };

        Ok(Self {
            serial: hex(strip_leading_zeros(cert.raw_serial())),
            common_name,
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            dns_names,
            is_ca,
            server_auth,
            not_before: timestamp(cert.validity().not_before.timestamp())?,
            not_after: timestamp(cert.validity().not_after.timestamp())?,
            rsa_modulus,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.not_after
    }

    /// Whether `key` is the private half of this certificate's public key.
    pub fn matches_key(&self, key: &RsaPrivateKey) -> bool {
        let modulus = key.n().to_bytes_be();
        self.rsa_modulus.as_deref() == Some(strip_leading_zeros(&modulus))
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn timestamp(secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| Error::decode(format!("Certificate time out of range: {}", e)))
}
