//! On-disk layout of the CA and issued leaf certificates

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const CA_CERT_FILE: &str = "ca-cert.pem";
pub const CA_KEY_FILE: &str = "ca-key.pem";

const CERT_MODE: u32 = 0o644;
const KEY_MODE: u32 = 0o600;

/// Certificate and key file locations for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// What was found on disk for a [`PairPaths`].
#[derive(Debug)]
pub enum StoredPair {
    /// Neither file exists.
    Missing,
    /// Only one of the two files exists.
    Partial { missing: PathBuf },
    Present { cert_pem: String, key_pem: String },
}

/// Storage root holding `ca-cert.pem`, `ca-key.pem` and
/// `<domain>-cert.pem` / `<domain>-key.pem` for every issued leaf.
#[derive(Debug, Clone)]
pub struct CertificateStore {
    root: PathBuf,
}

impl CertificateStore {
    /// Use `root`, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ca_paths(&self) -> PairPaths {
        PairPaths {
            cert: self.root.join(CA_CERT_FILE),
            key: self.root.join(CA_KEY_FILE),
        }
    }

    /// Callers must have validated `domain` (see `tls::domain`).
    pub fn leaf_paths(&self, domain: &str) -> PairPaths {
        PairPaths {
            cert: self.root.join(format!("{}-cert.pem", domain)),
            key: self.root.join(format!("{}-key.pem", domain)),
        }
    }

    pub fn read_pair(&self, paths: &PairPaths) -> Result<StoredPair> {
        let cert_pem = read_optional(&paths.cert)?;
        let key_pem = read_optional(&paths.key)?;

        Ok(match (cert_pem, key_pem) {
            (None, None) => StoredPair::Missing,
            (Some(_), None) => StoredPair::Partial {
                missing: paths.key.clone(),
            },
            (None, Some(_)) => StoredPair::Partial {
                missing: paths.cert.clone(),
            },
            (Some(cert_pem), Some(key_pem)) => StoredPair::Present { cert_pem, key_pem },
        })
    }

    /// Write the certificate world-readable and the key owner-only.
    pub fn write_pair(&self, paths: &PairPaths, cert_pem: &str, key_pem: &str) -> Result<()> {
        write_file(&paths.cert, cert_pem.as_bytes(), CERT_MODE)?;
        write_file(&paths.key, key_pem.as_bytes(), KEY_MODE)?;
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::storage(path, e)),
    }
}

/// Write through a temporary sibling and rename it over `path`, so readers
/// never observe a half-written file and the final mode is always `mode`.
fn write_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::storage(path, io::Error::other("path has no parent")))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::storage(path, io::Error::other("path has no file name")))?;
    let temp_path = parent.join(format!(
        ".{}.tmp-{:016x}",
        file_name.to_string_lossy(),
        rand::random::<u64>()
    ));

    let result = write_new_file(&temp_path, contents, mode)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|e| Error::storage(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

#[cfg(unix)]
fn write_new_file(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|e| Error::storage(path, e))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::storage(path, e))?;

    // The umask may have narrowed the creation mode.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::storage(path, e))
}

#[cfg(not(unix))]
fn write_new_file(path: &Path, contents: &[u8], _mode: u32) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::storage(path, e))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| Error::storage(path, e))
}
