//! Configuration for the MCP server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use drydock_core::{CoreError, EngineConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Maximum size for code/content input in bytes (10 MB).
pub const MAX_INPUT_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Transport mode for the MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Stdio only (default, for local AI tools)
    #[default]
    Stdio,
    /// Streamable HTTP only (for remote AI agents)
    Http,
    /// Both stdio and HTTP
    Both,
}

impl TransportMode {
    /// Parse from string (case-insensitive). Unknown values fall back to stdio.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "http" | "sse" | "remote" => Self::Http,
            "both" | "all" => Self::Both,
            _ => Self::Stdio,
        }
    }

    /// Check if stdio transport should be enabled.
    pub fn stdio_enabled(&self) -> bool {
        matches!(self, Self::Stdio | Self::Both)
    }

    /// Check if HTTP transport should be enabled.
    pub fn http_enabled(&self) -> bool {
        matches!(self, Self::Http | Self::Both)
    }
}

/// Configuration for the Drydock MCP server.
#[derive(Debug, Clone)]
pub struct DrydockConfig {
    /// Container image units are created from.
    pub image: String,

    /// Host directory shared with every unit.
    pub code_dir: PathBuf,

    /// Interpreter invoked on staged scripts.
    pub interpreter: String,

    /// Maximum live units (default: 4).
    pub max_units: usize,

    /// Idle time after which an available unit is evicted.
    pub idle_timeout: Duration,

    /// How long a request waits for a unit on a saturated pool.
    pub acquire_timeout: Duration,

    /// Wall-clock budget for one execution.
    pub exec_timeout: Duration,

    /// Period of the idle reaper.
    pub reap_interval: Duration,

    /// Memory limit per unit in MiB.
    pub memory_mb: u64,

    /// Host environment variable prefixes never passed to executed code.
    pub env_deny: Vec<String>,

    /// Transport mode (default: stdio).
    pub transport_mode: TransportMode,

    /// HTTP server bind address.
    pub http_addr: SocketAddr,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("code directory parent not found: {0}")]
    InvalidCodeDir(PathBuf),

    #[error(transparent)]
    Engine(#[from] CoreError),
}

impl Default for DrydockConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            image: engine.image,
            code_dir: engine.sandbox_root,
            interpreter: engine.interpreter,
            max_units: engine.max_units,
            idle_timeout: engine.idle_timeout,
            acquire_timeout: engine.acquire_timeout,
            exec_timeout: engine.exec_timeout,
            reap_interval: engine.reap_interval,
            memory_mb: (engine.memory_limit_bytes / (1024 * 1024)) as u64,
            env_deny: engine.env_deny_prefixes,
            transport_mode: TransportMode::Stdio,
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
        }
    }
}

fn env_parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn env_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    env_parse::<u64>(lookup, key).map(Duration::from_secs)
}

/// Split a comma separated list, dropping blanks.
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl DrydockConfig {
    /// Load configuration from environment variables.
    ///
    /// Missing or unparsable values fall back to the default.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DRYDOCK_IMAGE` | `python:3.9-slim` |
    /// | `DRYDOCK_CODE_DIR` | `$TMPDIR/python_code_execution` |
    /// | `DRYDOCK_INTERPRETER` | `python` |
    /// | `DRYDOCK_MAX_UNITS` | `4` |
    /// | `DRYDOCK_IDLE_TIMEOUT_SECS` | `300` |
    /// | `DRYDOCK_ACQUIRE_TIMEOUT_SECS` | `30` |
    /// | `DRYDOCK_EXEC_TIMEOUT_SECS` | `30` |
    /// | `DRYDOCK_REAP_INTERVAL_SECS` | `60` |
    /// | `DRYDOCK_MEMORY_MB` | `512` |
    /// | `DRYDOCK_ENV_DENY` | built-in list (comma separated) |
    /// | `DRYDOCK_TRANSPORT` | `stdio` (stdio, http, both) |
    /// | `DRYDOCK_HTTP_HOST` | `0.0.0.0` |
    /// | `DRYDOCK_HTTP_PORT` | `8080` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Self::default();
        let get = &lookup;

        let http_host: IpAddr =
            env_parse(get, "DRYDOCK_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 =
            env_parse(get, "DRYDOCK_HTTP_PORT").unwrap_or(default.http_addr.port());

        Self {
            image: get("DRYDOCK_IMAGE").unwrap_or(default.image),
            code_dir: get("DRYDOCK_CODE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.code_dir),
            interpreter: get("DRYDOCK_INTERPRETER").unwrap_or(default.interpreter),
            max_units: env_parse(get, "DRYDOCK_MAX_UNITS").unwrap_or(default.max_units),
            idle_timeout: env_secs(get, "DRYDOCK_IDLE_TIMEOUT_SECS")
                .unwrap_or(default.idle_timeout),
            acquire_timeout: env_secs(get, "DRYDOCK_ACQUIRE_TIMEOUT_SECS")
                .unwrap_or(default.acquire_timeout),
            exec_timeout: env_secs(get, "DRYDOCK_EXEC_TIMEOUT_SECS")
                .unwrap_or(default.exec_timeout),
            reap_interval: env_secs(get, "DRYDOCK_REAP_INTERVAL_SECS")
                .unwrap_or(default.reap_interval),
            memory_mb: env_parse(get, "DRYDOCK_MEMORY_MB").unwrap_or(default.memory_mb),
            env_deny: get("DRYDOCK_ENV_DENY")
                .map(|v| parse_list(&v))
                .unwrap_or(default.env_deny),
            transport_mode: get("DRYDOCK_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(default.transport_mode),
            http_addr: SocketAddr::new(http_host, http_port),
        }
    }

    /// Build the engine configuration for the core crate.
    pub fn to_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let memory_bytes = i64::try_from(self.memory_mb.saturating_mul(1024 * 1024))
            .map_err(|_| CoreError::Config(format!("memory limit too large: {} MiB", self.memory_mb)))?;

        Ok(EngineConfig::builder()
            .image(&self.image)
            .sandbox_root(&self.code_dir)
            .interpreter(&self.interpreter)
            .max_units(self.max_units)
            .idle_timeout(self.idle_timeout)
            .acquire_timeout(self.acquire_timeout)
            .exec_timeout(self.exec_timeout)
            .reap_interval(self.reap_interval)
            .memory_limit_bytes(memory_bytes)
            .env_deny_prefixes(self.env_deny.iter().cloned())
            .build()?)
    }

    /// Validate the configuration.
    ///
    /// The code directory itself is created on demand, so only its parent
    /// has to exist.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.code_dir.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(ConfigError::InvalidCodeDir(self.code_dir.clone()));
            }
        }
        self.to_engine_config()?;
        Ok(())
    }

    /// Validate configuration but only log warnings instead of failing.
    pub fn validate_warn(&self) {
        if let Err(e) = self.validate() {
            tracing::warn!(error = %e, "Configuration problem");
        }
        if self.env_deny.is_empty() {
            tracing::warn!("DRYDOCK_ENV_DENY is empty, the whole host environment reaches executed code");
        }
    }
}
