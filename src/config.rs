use crate::readiness::{self, GateConfig, ProbeTarget, ProbeTargetError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration, built once at boot and never re-read
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Legacy application layout
    #[serde(default)]
    pub app: AppConfig,

    /// Snapshot materialization
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Startup dependency gate
    #[serde(default)]
    pub dependencies: DependencyConfig,

    /// Legacy runtime host
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Native API settings
    #[serde(default)]
    pub native: NativeConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port (default: 8080)
    #[serde(default = "default_listen_port")]
    pub port: u16,

    /// Log one line per routing decision (default: false)
    #[serde(default)]
    pub log_routes: bool,

    /// Time in seconds in-flight requests get to finish on shutdown
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period_secs: u64,
}

impl ServerConfig {
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_listen_port(),
            log_routes: false,
            shutdown_grace_period_secs: default_shutdown_grace_period(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Writable root the legacy tree lives in (required)
    pub root: Option<String>,

    /// Overlay root for user-generated downloads
    pub data_dir: Option<String>,

    /// Front controller script relative to the root (default: index.php)
    #[serde(default = "default_front_controller")]
    pub front_controller: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: None,
            data_dir: None,
            front_controller: default_front_controller(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ArchiveConfig {
    /// Path to the gzip tar snapshot; extraction is skipped when unset
    pub snapshot: Option<String>,

    /// Wipe and re-extract a root whose marker does not match
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DependencyConfig {
    /// Wait for dependencies before serving (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Relational store connection string, `mysql:host=..;port=..`
    pub mysql_dsn: Option<String>,

    /// Search index host, `host[:port]` or URL
    pub search_host: Option<String>,

    /// Connection attempts per dependency
    #[serde(default = "default_probe_attempts")]
    pub attempts: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_probe_delay")]
    pub delay_ms: u64,

    /// Per-attempt connect timeout in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub connect_timeout_ms: u64,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mysql_dsn: None,
            search_host: None,
            attempts: default_probe_attempts(),
            delay_ms: default_probe_delay(),
            connect_timeout_ms: default_probe_timeout(),
        }
    }
}

impl DependencyConfig {
    pub fn gate(&self) -> GateConfig {
        GateConfig {
            attempts: self.attempts,
            delay: Duration::from_millis(self.delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    /// Resolve probe targets: relational store first, then search index.
    pub fn targets(&self) -> Result<Vec<ProbeTarget>, ConfigError> {
        let dsn = self.mysql_dsn.as_deref().unwrap_or_default();
        let mysql = readiness::mysql_address(dsn).map_err(ConfigError::MysqlDsn)?;
        let search = readiness::host_port(
            self.search_host.as_deref().unwrap_or_default(),
            readiness::DEFAULT_SEARCH_PORT,
        )
        .map_err(ConfigError::SearchHost)?;

        Ok(vec![
            ProbeTarget::new("mysql", mysql),
            ProbeTarget::new("elasticsearch", search),
        ])
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    /// Base URL of the legacy runtime host (required)
    pub url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum idle connections to the runtime
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle: usize,

    /// Idle connection timeout in seconds
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: None,
            request_timeout_secs: default_request_timeout(),
            pool_max_idle: default_pool_max_idle(),
            pool_idle_timeout_secs: default_pool_idle_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NativeConfig {
    /// Bearer token guarding the native API; open when unset
    pub internal_token: Option<String>,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_shutdown_grace_period() -> u64 {
    20
}

fn default_front_controller() -> String {
    "index.php".to_string()
}

fn default_true() -> bool {
    true
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_probe_delay() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    2000
}

fn default_request_timeout() -> u64 {
    120
}

fn default_pool_max_idle() -> usize {
    10
}

fn default_pool_idle_timeout() -> u64 {
    90
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required settings: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("application root not found at {0}")]
    AppRootNotFound(PathBuf),

    #[error("front controller not found at {0}")]
    FrontControllerNotFound(PathBuf),

    #[error("invalid mysql dsn: {0}")]
    MysqlDsn(#[source] ProbeTargetError),

    #[error("invalid search host: {0}")]
    SearchHost(#[source] ProbeTargetError),
}

/// Environment keys that override file settings
pub mod env_keys {
    pub const ADDR: &str = "ATOMGATE_ADDR";
    pub const APP_ROOT: &str = "ATOMGATE_APP_ROOT";
    pub const DATA_DIR: &str = "ATOMGATE_DATA_DIR";
    pub const FORCE_EXTRACT: &str = "ATOMGATE_FORCE_EXTRACT";
    pub const LOG_ROUTES: &str = "ATOMGATE_LOG_ROUTES";
    pub const SNAPSHOT: &str = "ATOMGATE_SNAPSHOT";
    pub const RUNTIME_URL: &str = "ATOMGATE_RUNTIME_URL";
    pub const INTERNAL_TOKEN: &str = "ATOMGATE_INTERNAL_TOKEN";
    pub const MYSQL_DSN: &str = "ATOM_MYSQL_DSN";
    pub const SEARCH_HOST: &str = "ATOM_ELASTICSEARCH_HOST";
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Ok(true),
        "0" | "f" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

impl Config {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay settings from the process environment
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay settings from an environment lookup. Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(addr) = get(env_keys::ADDR) {
            let (bind, port) = addr.rsplit_once(':').ok_or_else(|| ConfigError::InvalidValue {
                key: env_keys::ADDR,
                value: addr.clone(),
            })?;
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: env_keys::ADDR,
                value: addr.clone(),
            })?;
            if !bind.is_empty() {
                self.server.bind = bind.to_string();
            }
        }
        if let Some(root) = get(env_keys::APP_ROOT) {
            self.app.root = Some(root);
        }
        if let Some(dir) = get(env_keys::DATA_DIR) {
            self.app.data_dir = Some(dir);
        }
        if let Some(force) = get(env_keys::FORCE_EXTRACT) {
            self.archive.force = parse_bool(env_keys::FORCE_EXTRACT, &force)?;
        }
        if let Some(flag) = get(env_keys::LOG_ROUTES) {
            // Any non-empty value other than an explicit false turns logging on
            self.server.log_routes = parse_bool(env_keys::LOG_ROUTES, &flag).unwrap_or(true);
        }
        if let Some(snapshot) = get(env_keys::SNAPSHOT) {
            self.archive.snapshot = Some(snapshot);
        }
        if let Some(url) = get(env_keys::RUNTIME_URL) {
            self.runtime.url = Some(url);
        }
        if let Some(token) = get(env_keys::INTERNAL_TOKEN) {
            self.native.internal_token = Some(token);
        }
        if let Some(dsn) = get(env_keys::MYSQL_DSN) {
            self.dependencies.mysql_dsn = Some(dsn);
        }
        if let Some(host) = get(env_keys::SEARCH_HOST) {
            self.dependencies.search_host = Some(host);
        }

        Ok(())
    }

    /// Check that every required setting is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.app.root.is_none() {
            missing.push("app.root");
        }
        if self.runtime.url.is_none() {
            missing.push("runtime.url");
        }
        if self.dependencies.enabled {
            if self.dependencies.mysql_dsn.is_none() {
                missing.push("dependencies.mysql_dsn");
            }
            if self.dependencies.search_host.is_none() {
                missing.push("dependencies.search_host");
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        Ok(())
    }

    /// Absolute application root as configured (may not exist yet)
    pub fn app_root(&self) -> Result<PathBuf, ConfigError> {
        let root = self
            .app
            .root
            .as_deref()
            .ok_or(ConfigError::Missing(vec!["app.root"]))?;
        Ok(absolute(Path::new(root)))
    }

    /// Resolve the on-disk layout once the tree is materialized
    pub fn resolve_app(&self) -> Result<ResolvedApp, ConfigError> {
        let root = self.app_root()?;
        if !root.is_dir() {
            return Err(ConfigError::AppRootNotFound(root));
        }

        let front_controller = root.join(&self.app.front_controller);
        if !front_controller.is_file() {
            return Err(ConfigError::FrontControllerNotFound(front_controller));
        }

        let data_dir = self
            .app
            .data_dir
            .as_deref()
            .map(|dir| absolute(Path::new(dir)));

        Ok(ResolvedApp {
            root,
            front_controller,
            data_dir,
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Immutable layout of the legacy application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedApp {
    pub root: PathBuf,
    pub front_controller: PathBuf,
    pub data_dir: Option<PathBuf>,
}
