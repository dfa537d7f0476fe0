//! Configuration parsing and management

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tls::normalize_domain;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener and routing settings
    #[serde(default)]
    pub router: RouterConfig,

    /// Certificate authority and leaf storage settings
    #[serde(default)]
    pub certificates: CertificateConfig,

    /// Backend discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Address for the plain HTTP listener
    #[serde(default = "default_http_address")]
    pub http_address: String,

    /// Address for the HTTPS listener
    #[serde(default = "default_https_address")]
    pub https_address: String,

    /// Port every backend is expected to listen on
    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// Certificate name served to clients that send no SNI
    #[serde(default = "default_domain")]
    pub default_domain: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            http_address: default_http_address(),
            https_address: default_https_address(),
            backend_port: default_backend_port(),
            default_domain: default_domain(),
        }
    }
}

fn default_http_address() -> String {
    "0.0.0.0:80".to_string()
}

fn default_https_address() -> String {
    "0.0.0.0:443".to_string()
}

fn default_backend_port() -> u16 {
    8080
}

fn default_domain() -> String {
    "localhost".to_string()
}

/// How certificate lookups are serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockScope {
    /// One process-wide lock for every lookup and issuance.
    #[default]
    Global,
    /// One lock per domain; unrelated domains do not wait on each other.
    PerDomain,
}

/// What to do when CA files exist on disk but cannot be loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaRecovery {
    /// Refuse to start. Previously trusted leaves stay valid.
    #[default]
    Fail,
    /// Mint a new root and overwrite the unreadable files.
    Regenerate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Directory holding the CA and every issued leaf
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub lock_scope: LockScope,

    #[serde(default)]
    pub ca_recovery: CaRecovery,

    /// Reissue leaves whose validity has ended instead of serving them
    #[serde(default = "default_true")]
    pub reissue_expired: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            lock_scope: LockScope::default(),
            ca_recovery: CaRecovery::default(),
            reissue_expired: true,
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("/mnt/certificates")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Container label whose value is the routed hostname
    #[serde(default = "default_label")]
    pub label: String,

    /// Docker Engine API socket
    #[serde(default = "default_docker_socket")]
    pub docker_socket: PathBuf,

    /// Seconds between route refreshes
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            docker_socket: default_docker_socket(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn default_label() -> String {
    "local-router.host".to_string()
}

fn default_docker_socket() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}

fn default_refresh_interval_secs() -> u64 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency. Also run after CLI overrides are applied.
    pub fn validate(&self) -> Result<()> {
        self.http_addr()?;
        self.https_addr()?;

        normalize_domain(&self.router.default_domain).map_err(|e| {
            Error::config(format!("Invalid `router.default_domain`: {}", e))
        })?;
        if self.router.backend_port == 0 {
            return Err(Error::config("`router.backend_port` must be non-zero"));
        }
        if self.discovery.label.trim().is_empty() {
            return Err(Error::config("`discovery.label` must not be empty"));
        }
        if self.discovery.refresh_interval_secs == 0 {
            return Err(Error::config(
                "`discovery.refresh_interval_secs` must be at least 1",
            ));
        }
        if self.certificates.storage_dir.as_os_str().is_empty() {
            return Err(Error::config("`certificates.storage_dir` must not be empty"));
        }

        Ok(())
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        parse_addr("router.http_address", &self.router.http_address)
    }

    pub fn https_addr(&self) -> Result<SocketAddr> {
        parse_addr("router.https_address", &self.router.https_address)
    }

    /// Configuration for tests and embedding: ephemeral ports on loopback.
    pub fn local(storage_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.router.http_address = "127.0.0.1:0".to_string();
        config.router.https_address = "127.0.0.1:0".to_string();
        config.certificates.storage_dir = storage_dir.into();
        config
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| Error::config(format!("Invalid `{}` '{}': {}", field, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_report;

    #[test]
    fn test_parse_empty_config_uses_defaults() {
        let t = test_report!("Empty config falls back to defaults");
        let config = Config::parse("").unwrap();

        t.assert_eq(
            "http address",
            &config.router.http_address.as_str(),
            &"0.0.0.0:80",
        );
        t.assert_eq(
            "https address",
            &config.router.https_address.as_str(),
            &"0.0.0.0:443",
        );
        t.assert_eq("backend port", &config.router.backend_port, &8080u16);
        t.assert_eq(
            "default domain",
            &config.router.default_domain.as_str(),
            &"localhost",
        );
        t.assert_eq(
            "storage dir",
            &config.certificates.storage_dir,
            &PathBuf::from("/mnt/certificates"),
        );
        t.assert_eq(
            "lock scope",
            &config.certificates.lock_scope,
            &LockScope::Global,
        );
        t.assert_eq(
            "ca recovery",
            &config.certificates.ca_recovery,
            &CaRecovery::Fail,
        );
        t.assert_true("reissue expired", config.certificates.reissue_expired);
        t.assert_eq(
            "refresh interval",
            &config.discovery.refresh_interval(),
            &Duration::from_secs(10),
        );
    }

    #[test]
    fn test_parse_full_config() {
        let t = test_report!("Parse a config with every section");
        let toml = r#"
[router]
http_address = "127.0.0.1:8000"
https_address = "127.0.0.1:8443"
backend_port = 3000
default_domain = "dev.test"

[certificates]
storage_dir = "/tmp/certs"
lock_scope = "per-domain"
ca_recovery = "regenerate"
reissue_expired = false

[discovery]
label = "router.hostname"
docker_socket = "/run/docker.sock"
refresh_interval_secs = 30

[logging]
level = "debug"
"#;

        let config = Config::parse(toml).unwrap();
        t.assert_eq("backend port", &config.router.backend_port, &3000u16);
        t.assert_eq(
            "default domain",
            &config.router.default_domain.as_str(),
            &"dev.test",
        );
        t.assert_eq(
            "lock scope",
            &config.certificates.lock_scope,
            &LockScope::PerDomain,
        );
        t.assert_eq(
            "ca recovery",
            &config.certificates.ca_recovery,
            &CaRecovery::Regenerate,
        );
        t.assert_true("reissue disabled", !config.certificates.reissue_expired);
        t.assert_eq(
            "label",
            &config.discovery.label.as_str(),
            &"router.hostname",
        );
        t.assert_eq(
            "interval",
            &config.discovery.refresh_interval(),
            &Duration::from_secs(30),
        );
        t.assert_eq("log level", &config.logging.level.as_str(), &"debug");
        t.assert_eq(
            "https addr",
            &config.https_addr().unwrap(),
            &"127.0.0.1:8443".parse::<SocketAddr>().unwrap(),
        );
    }

    #[test]
    fn test_reject_zero_refresh_interval() {
        let t = test_report!("Zero refresh interval is rejected");
        let result = Config::parse("[discovery]\nrefresh_interval_secs = 0\n");
        t.assert_true("parse fails", result.is_err());
    }

    #[test]
    fn test_reject_bad_listen_address() {
        let t = test_report!("Unparseable listen address is rejected");
        let result = Config::parse("[router]\nhttp_address = \"not-an-address\"\n");
        let err = result.unwrap_err().to_string();
        t.assert_contains("names the field", &err, "router.http_address");
    }

    #[test]
    fn test_reject_unknown_lock_scope() {
        let t = test_report!("Unknown lock scope is rejected");
        let result = Config::parse("[certificates]\nlock_scope = \"sharded\"\n");
        t.assert_true("parse fails", result.is_err());
    }

    #[test]
    fn test_reject_malformed_default_domain() {
        let t = test_report!("Default domain must be a usable certificate name");
        for bad in ["", "local host", "../x", "ca"] {
            t.action(format!("default_domain = {:?}", bad));
            let result = Config::parse(&format!("[router]\ndefault_domain = {:?}\n", bad));
            match result {
                Err(e) => t.assert_contains("names the field", &e.to_string(), "router.default_domain"),
                Ok(_) => panic!("{:?} accepted", bad),
            }
        }
    }

    #[test]
    fn test_reject_empty_label() {
        let t = test_report!("Empty discovery label is rejected");
        let result = Config::parse("[discovery]\nlabel = \"\"\n");
        t.assert_true("parse fails", result.is_err());
    }

    #[test]
    fn test_local_config_uses_ephemeral_ports() {
        let t = test_report!("Local config binds loopback port 0");
        let config = Config::local("/tmp/x");
        t.assert_eq("http port", &config.http_addr().unwrap().port(), &0u16);
        t.assert_eq("https port", &config.https_addr().unwrap().port(), &0u16);
        t.assert_true("valid", config.validate().is_ok());
    }
}
