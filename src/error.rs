//! Error types for local-router

use std::io;
use std::path::PathBuf;

/// Main error type for the router
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    /// A storage path could not be read or written.
    #[error("Storage error at '{}': {source}", path.display())]
    Storage { path: PathBuf, source: io::Error },

    /// PEM or DER content could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Key generation, signing or key/certificate pairing failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// CA files exist but cannot be loaded as a pair.
    #[error("CA at '{}' is corrupt: {reason}", path.display())]
    CaCorrupt { path: PathBuf, reason: String },

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    /// Composite failure surfaced to the TLS handshake.
    #[error("Failed to provide a certificate for '{domain}': {source}")]
    Issuance {
        domain: String,
        #[source]
        source: Box<Error>,
    },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Proxy error: {0}")]
    Proxy(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn ca_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CaCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_domain(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    pub fn issuance(domain: impl Into<String>, source: Error) -> Self {
        Error::Issuance {
            domain: domain.into(),
            source: Box::new(source),
        }
    }

    pub fn tls(msg: impl Into<String>) -> Self {
        Error::Tls(msg.into())
    }

    pub fn discovery(msg: impl Into<String>) -> Self {
        Error::Discovery(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Error::Proxy(msg.into())
    }
}

impl From<rcgen::Error> for Error {
    fn from(e: rcgen::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

impl From<rsa::Error> for Error {
    fn from(e: rsa::Error) -> Self {
        Error::Crypto(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
