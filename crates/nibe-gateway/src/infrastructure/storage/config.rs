//! TOML-based configuration for the gateway monitor.
//!
//! Loaded from an explicit path or from the platform-appropriate config file:
//! - Windows:  `%APPDATA%\nibegw\config.toml`
//! - Linux:    `~/.config/nibegw/config.toml`
//! - macOS:    `~/Library/Application Support/nibegw/config.toml`
//!
//! ```toml
//! [gateway]
//! listen_address = "0.0.0.0:9999"
//! remote_ip = "192.168.1.50"
//!
//! [engine]
//! read_retries = 3
//! timeout_ms = 5000
//!
//! [logging]
//! level = "info"
//!
//! [[registers]]
//! address = 40004
//! name = "bt1-outdoor-temperature-40004"
//! size = "s16"
//! factor = 10
//! unit = "°C"
//! ```
//!
//! Every section and field is optional; missing ones take the defaults
//! below.  When `engine.word_swap` is absent the engine asks the heat pump.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nibe_core::coil::{CatalogError, Encoding, RegisterCatalog, RegisterDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::application::engine::{
    EngineSettings, DEFAULT_PRODUCT_INFO_TIMEOUT, DEFAULT_READ_PORT, DEFAULT_WRITE_PORT, WORD_SWAP_REGISTER,
};
use crate::application::retry::{RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The `[[registers]]` tables are inconsistent.
    #[error("invalid register catalog: {0}")]
    Catalog(#[from] CatalogError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registers: Vec<RegisterDefinition>,
}

/// Where to listen and where the gateway is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    /// Local address the gateway sends its datagrams to.
    #[serde(default = "default_listen_address")]
    pub listen_address: SocketAddr,
    /// Gateway IP.  Absent means "adopt the sender of the first datagram".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<IpAddr>,
    #[serde(default = "default_read_port")]
    pub read_port: u16,
    #[serde(default = "default_write_port")]
    pub write_port: u16,
}

/// Request handling of the protocol engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Word order of 32-bit registers.  Absent means "detect at start-up".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_swap: Option<bool>,
    #[serde(default = "default_retries")]
    pub read_retries: u32,
    #[serde(default = "default_retries")]
    pub write_retries: u32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_product_info_timeout_ms")]
    pub product_info_timeout_ms: u64,
    /// Read and reset the alarm-reset register once at start-up.
    #[serde(default)]
    pub verify_connectivity: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` level or filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_READ_PORT))
}
fn default_read_port() -> u16 {
    DEFAULT_READ_PORT
}
fn default_write_port() -> u16 {
    DEFAULT_WRITE_PORT
}
fn default_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}
fn default_product_info_timeout_ms() -> u64 {
    DEFAULT_PRODUCT_INFO_TIMEOUT.as_millis() as u64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            remote_ip: None,
            read_port: default_read_port(),
            write_port: default_write_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            word_swap: None,
            read_retries: default_retries(),
            write_retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            product_info_timeout_ms: default_product_info_timeout_ms(),
            verify_connectivity: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Engine settings described by this configuration.
    ///
    /// An undetermined word order starts out unswapped until detection runs.
    pub fn engine_settings(&self) -> EngineSettings {
        let timeout = Duration::from_millis(self.engine.timeout_ms);
        EngineSettings {
            remote_ip: self.gateway.remote_ip,
            read_port: self.gateway.read_port,
            write_port: self.gateway.write_port,
            word_swap: self.engine.word_swap.unwrap_or(false),
            read_policy: RetryPolicy::new(self.engine.read_retries, timeout),
            write_policy: RetryPolicy::new(self.engine.write_retries, timeout),
        }
    }

    pub fn product_info_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.product_info_timeout_ms)
    }

    /// Builds the register catalog from `[[registers]]`.
    ///
    /// The pump's word-swap setting is added when the file does not define
    /// it, so word order detection always has a definition to read.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Catalog`] for inconsistent definitions.
    pub fn catalog(&self) -> Result<RegisterCatalog, ConfigError> {
        let mut definitions = self.registers.clone();
        if !definitions.iter().any(|d| d.address == WORD_SWAP_REGISTER) {
            definitions.push(
                RegisterDefinition::new(WORD_SWAP_REGISTER, "modbus40-word-swap-48852", Encoding::U8)
                    .with_bounds(Some(0), Some(1))
                    .writable(),
            );
        }
        Ok(RegisterCatalog::new(definitions)?)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the default location, returning
/// `AppConfig::default()` if the file does not exist yet.
///
/// # Errors
///
/// See [`load_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            debug!(path = %path.display(), registers = cfg.registers.len(), "configuration loaded");
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Resolves the platform config directory including the `nibegw` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("nibegw"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("nibegw"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("Library").join("Application Support").join("nibegw"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("nibegw-config-test-{}", std::process::id()))
            .join(name)
    }

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_has_gateway_ports() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.gateway.listen_address.port(), 9999);
        assert_eq!(cfg.gateway.read_port, 9999);
        assert_eq!(cfg.gateway.write_port, 10000);
        assert_eq!(cfg.gateway.remote_ip, None);
    }

    #[test]
    fn test_engine_config_defaults() {
        let cfg = EngineConfig::default();

        assert_eq!(cfg.word_swap, None);
        assert_eq!(cfg.read_retries, 3);
        assert_eq!(cfg.timeout_ms, 5000);
        assert_eq!(cfg.product_info_timeout_ms, 20_000);
        assert!(!cfg.verify_connectivity);
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_full_file() {
        // Arrange
        let toml_str = r#"
[gateway]
listen_address = "0.0.0.0:9999"
remote_ip = "192.168.1.50"
write_port = 10001

[engine]
word_swap = true
read_retries = 1
timeout_ms = 250
verify_connectivity = true

[logging]
level = "debug"

[[registers]]
address = 40004
name = "bt1-outdoor-temperature-40004"
size = "s16"
factor = 10
unit = "°C"

[[registers]]
address = 47137
name = "operational-mode-47137"
size = "u8"
mappings = { "0" = "Auto", "1" = "Manual", "2" = "Add. heat only" }
write = true
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize full");
        let settings = cfg.engine_settings();

        // Assert
        assert_eq!(settings.remote_ip, Some("192.168.1.50".parse().unwrap()));
        assert_eq!(settings.read_port, 9999);
        assert_eq!(settings.write_port, 10001);
        assert!(settings.word_swap);
        assert_eq!(settings.read_policy, RetryPolicy::new(1, Duration::from_millis(250)));
        assert_eq!(settings.write_policy.max_retries, 3);
        assert!(cfg.engine.verify_connectivity);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.registers.len(), 2);
        assert_eq!(cfg.registers[0].encoding, Encoding::S16);
    }

    #[test]
    fn test_deserialize_invalid_remote_ip_fails() {
        let result: Result<AppConfig, _> = toml::from_str("[gateway]\nremote_ip = \"heatpump\"\n");
        assert!(result.is_err());
    }

    // ── Catalog ───────────────────────────────────────────────────────────────

    #[test]
    fn test_catalog_adds_word_swap_register() {
        let cfg = AppConfig::default();

        let catalog = cfg.catalog().expect("catalog");

        let def = catalog.get(WORD_SWAP_REGISTER).expect("48852 present");
        assert!(def.is_boolean());
    }

    #[test]
    fn test_catalog_reports_duplicate_registers() {
        let mut cfg = AppConfig::default();
        cfg.registers.push(RegisterDefinition::new(40004, "a", Encoding::S16));
        cfg.registers.push(RegisterDefinition::new(40004, "b", Encoding::S16));

        let result = cfg.catalog();

        assert!(matches!(
            result,
            Err(ConfigError::Catalog(CatalogError::DuplicateAddress { address: 40004 }))
        ));
    }

    // ── File round-trip ───────────────────────────────────────────────────────

    #[test]
    fn test_written_config_loads_back() {
        // Arrange
        let path = scratch_path("round-trip/config.toml");
        let mut cfg = AppConfig::default();
        cfg.gateway.remote_ip = Some("10.0.0.7".parse().unwrap());
        cfg.engine.word_swap = Some(false);
        cfg.registers.push(
            RegisterDefinition::new(43005, "operating-mode-43005", Encoding::U8)
                .with_mappings([(0, "Off"), (1, "On")])
                .writable(),
        );

        // Act
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();
        let restored = load_from(&path).expect("load");

        // Assert
        assert_eq!(restored, cfg);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_from_missing_file_returns_default() {
        let path = scratch_path("does-not-exist.toml");

        let cfg = load_from(&path).expect("defaults");

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_from_malformed_file_is_parse_error() {
        // Arrange
        let path = scratch_path("malformed/config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        // Act
        let result = load_from(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }
}
