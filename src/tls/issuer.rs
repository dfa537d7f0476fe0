//! Leaf certificate issuance

use rand::Rng;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose,
    SanType, SerialNumber,
};
use rsa::RsaPrivateKey;
use rustls::pki_types::CertificateDer;

use super::ca::CertificateAuthority;
use super::keys;
use crate::error::{Error, Result};

/// Leaf validity: one year.
pub const LEAF_VALIDITY_DAYS: i64 = 365;

/// Serials are drawn from `[1, 2^62)`.
const SERIAL_UPPER_BOUND: u64 = 1 << 62;

/// A leaf certificate fresh from the signer.
pub struct IssuedLeaf {
    pub cert_der: CertificateDer<'static>,
    pub cert_pem: String,
    pub key: RsaPrivateKey,
    pub key_pem: String,
}

/// Issue a server certificate for `domain` signed by `ca`.
///
/// `domain` must already be normalized.
pub fn issue_leaf(domain: &str, ca: &CertificateAuthority) -> Result<IssuedLeaf> {
    let mut params = CertificateParams::default();

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, domain);
    params.distinguished_name = distinguished_name;

    params.subject_alt_names = vec![SanType::DnsName(
        domain
            .try_into()
            .map_err(|e| Error::invalid_domain(domain, format!("{}", e)))?,
    )];

    params.serial_number = Some(random_serial());
    params.is_ca = IsCa::NoCa;
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];

    params.not_before = time::OffsetDateTime::now_utc();
    params.not_after = params.not_before + time::Duration::days(LEAF_VALIDITY_DAYS);

    let key = keys::generate_rsa_key()?;
    let key_pair = keys::signing_key_pair(&key)?;

    let cert = params
        .signed_by(&key_pair, ca.issuer(), ca.key_pair())
        .map_err(|e| Error::crypto(format!("Failed to sign certificate: {}", e)))?;

    tracing::debug!(domain = %domain, "Signed leaf certificate");

    Ok(IssuedLeaf {
        cert_der: cert.der().clone(),
        cert_pem: cert.pem(),
        key_pem: keys::encode_private_key_pem(&key)?,
        key,
    })
}

fn random_serial() -> SerialNumber {
    let serial = rand::thread_rng().gen_range(1..SERIAL_UPPER_BOUND);
    let bytes = serial.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    SerialNumber::from_slice(&bytes[start..])
}
