//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment < CLI
use anyhow::{ensure, Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::DEFAULT_SHUTDOWN_GRACE;
use crate::server::address::AUTO_INTERFACE;
use crate::server::token::is_valid_path_token;

pub const ENV_PREFIX: &str = "QRDROP_";
pub const DEFAULT_EXTERNAL_IP_URL: &str = "https://api.ipify.org";

pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "qrdrop")
        .map(|p| p.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("qrdrop.toml"))
}

/// Lowest TLS protocol version the server negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "tls1.2")]
    Tls12,
    #[serde(rename = "tls1.3")]
    Tls13,
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `auto`, `any`, an interface name, or a literal IP
    pub interface: String,
    pub bind: Option<IpAddr>,
    pub port: u16,
    /// Fixed URL path token, random when unset
    pub path: Option<String>,
    pub fqdn: Option<String>,
    /// Receive destination, current directory when unset
    pub output: Option<PathBuf>,
    pub keep_alive: bool,
    pub secure: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_min_version: TlsVersion,
    pub external_ip_url: String,
    pub shutdown_grace_secs: u64,
    /// Also serve the QR code at `/qr` and open it in a browser
    pub browser: bool,
    /// Invert QR colors for light terminals
    pub reversed: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: AUTO_INTERFACE.to_string(),
            bind: None,
            port: 0,
            path: None,
            fqdn: None,
            output: None,
            keep_alive: false,
            secure: false,
            tls_cert: None,
            tls_key: None,
            tls_min_version: TlsVersion::default(),
            external_ip_url: DEFAULT_EXTERNAL_IP_URL.to_string(),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
            browser: false,
            reversed: false,
        }
    }
}

impl AppConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Certificate and key paths, when both are configured.
    pub fn tls_material(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }

    /// Rejects combinations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.interface.trim().is_empty(),
            "Invalid config: interface must not be empty"
        );
        ensure!(
            self.tls_cert.is_some() == self.tls_key.is_some(),
            "Invalid config: tls_cert and tls_key must be set together"
        );
        if let Some(path) = &self.path {
            ensure!(
                is_valid_path_token(path),
                "Invalid config: path must be non-empty and URL-safe, got '{path}'"
            );
        }
        ensure!(
            self.shutdown_grace_secs > 0,
            "Invalid config: shutdown_grace_secs must be > 0"
        );
        ensure!(
            !self.external_ip_url.trim().is_empty(),
            "Invalid config: external_ip_url must not be empty"
        );
        Ok(())
    }
}

/// Values given on the command line. `None`/`false` leaves the loaded value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub interface: Option<String>,
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub fqdn: Option<String>,
    pub output: Option<PathBuf>,
    pub keep_alive: bool,
    pub secure: bool,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_min_version: Option<TlsVersion>,
    pub external_ip_url: Option<String>,
    pub shutdown_grace_secs: Option<u64>,
    pub browser: bool,
    pub reversed: bool,
}

impl std::str::FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tls1.2" | "1.2" => Ok(TlsVersion::Tls12),
            "tls1.3" | "1.3" => Ok(TlsVersion::Tls13),
            other => Err(format!("unknown TLS version '{other}', expected tls1.2 or tls1.3")),
        }
    }
}

/// Loads config from defaults/file/env using the platform config path.
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&config_path())
}

/// Loads config from defaults, the given TOML file (if present), and env.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let config: AppConfig = Figment::new()
        .merge(Serialized::defaults(AppConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Applies runtime overrides to a loaded config.
pub fn apply_overrides(mut config: AppConfig, overrides: &ConfigOverrides) -> AppConfig {
    if let Some(interface) = &overrides.interface {
        config.interface = interface.clone();
    }
    if overrides.bind.is_some() {
        config.bind = overrides.bind;
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if overrides.path.is_some() {
        config.path = overrides.path.clone();
    }
    if overrides.fqdn.is_some() {
        config.fqdn = overrides.fqdn.clone();
    }
    if overrides.output.is_some() {
        config.output = overrides.output.clone();
    }
    if overrides.tls_cert.is_some() {
        config.tls_cert = overrides.tls_cert.clone();
    }
    if overrides.tls_key.is_some() {
        config.tls_key = overrides.tls_key.clone();
    }
    if let Some(version) = overrides.tls_min_version {
        config.tls_min_version = version;
    }
    if let Some(url) = &overrides.external_ip_url {
        config.external_ip_url = url.clone();
    }
    if let Some(secs) = overrides.shutdown_grace_secs {
        config.shutdown_grace_secs = secs;
    }
    config.keep_alive |= overrides.keep_alive;
    config.secure |= overrides.secure;
    config.browser |= overrides.browser;
    config.reversed |= overrides.reversed;

    config
}
