//! Local root CA, leaf issuance and certificate resolution for TLS

mod ca;
mod cache;
mod domain;
mod issuer;
mod keys;
mod resolver;
mod store;
mod x509;

pub use ca::{CertificateAuthority, GeneratedCa, CA_COMMON_NAME, CA_VALIDITY_DAYS};
pub use cache::{CertificateCache, LeafCertificate};
pub use domain::normalize_domain;
pub use issuer::{issue_leaf, IssuedLeaf, LEAF_VALIDITY_DAYS};
pub use keys::{decode_private_key_pem, encode_private_key_pem};
pub use resolver::{config_with_key, SniResolver};
pub use store::{CertificateStore, PairPaths, StoredPair, CA_CERT_FILE, CA_KEY_FILE};
pub use x509::{decode_certificate_pem, verify_issued_by, CertInfo};
