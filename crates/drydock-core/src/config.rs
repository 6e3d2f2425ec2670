//! Engine configuration types.

use crate::error::CoreError;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefixes never forwarded into an execution unit.
///
/// These identify the host or would clobber the image's own environment.
pub const DEFAULT_ENV_DENY_PREFIXES: &[&str] = &[
    "PATH", "HOME", "HOSTNAME", "USER", "LOGNAME", "SHELL", "PWD", "OLDPWD", "TERM", "LANG",
    "LC_", "TMPDIR", "SSH_", "XDG_", "DISPLAY", "DOCKER_", "DRYDOCK_", "RUST_",
];

/// Configuration shared by the pool and the orchestrator.
///
/// Constructed once at startup and passed by reference into
/// [`Pool::new`](crate::Pool::new) and [`Orchestrator::new`](crate::Orchestrator::new).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Container image used for every execution unit.
    pub image: String,
    /// Host directory bind-mounted writable into every unit.
    pub sandbox_root: PathBuf,
    /// Where `sandbox_root` appears inside a unit (default: `/code`).
    pub mount_point: String,
    /// Program that runs the staged script (default: `python`).
    pub interpreter: String,
    /// Upper bound on live units, busy or available (default: 4).
    pub max_units: usize,
    /// Available units idle longer than this are reaped (default: 5 minutes).
    pub idle_timeout: Duration,
    /// How long `acquire` waits on a saturated pool (default: 30 seconds).
    pub acquire_timeout: Duration,
    /// Backstop wake-up interval while waiting for a unit (default: 250 ms).
    pub acquire_poll_interval: Duration,
    /// Idle reaper cycle (default: 60 seconds).
    pub reap_interval: Duration,
    /// Hard wall-clock limit for one execution (default: 30 seconds).
    pub exec_timeout: Duration,
    /// Memory limit per unit in bytes (default: 512 MiB).
    pub memory_limit_bytes: i64,
    /// Host environment variables with any of these prefixes are dropped.
    pub env_deny_prefixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image: "python:3.9-slim".into(),
            sandbox_root: std::env::temp_dir().join("python_code_execution"),
            mount_point: "/code".into(),
            interpreter: "python".into(),
            max_units: 4,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            acquire_poll_interval: Duration::from_millis(250),
            reap_interval: Duration::from_secs(60),
            exec_timeout: Duration::from_secs(30),
            memory_limit_bytes: 512 * 1024 * 1024,
            env_deny_prefixes: DEFAULT_ENV_DENY_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.image.trim().is_empty() {
            return Err(CoreError::Config("image is required".into()));
        }
        if self.sandbox_root.as_os_str().is_empty() {
            return Err(CoreError::Config("sandbox_root is required".into()));
        }
        if !self.mount_point.starts_with('/') {
            return Err(CoreError::Config(format!(
                "mount_point must be absolute, got {:?}",
                self.mount_point
            )));
        }
        if self.interpreter.trim().is_empty() {
            return Err(CoreError::Config("interpreter is required".into()));
        }
        if self.max_units == 0 {
            return Err(CoreError::Config("max_units must be > 0".into()));
        }
        if self.exec_timeout.is_zero() {
            return Err(CoreError::Config("exec_timeout must be > 0".into()));
        }
        if self.acquire_poll_interval.is_zero() {
            return Err(CoreError::Config("acquire_poll_interval must be > 0".into()));
        }
        if self.reap_interval.is_zero() {
            return Err(CoreError::Config("reap_interval must be > 0".into()));
        }
        if self.memory_limit_bytes <= 0 {
            return Err(CoreError::Config("memory_limit_bytes must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the container image.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set the host sandbox root.
    pub fn sandbox_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sandbox_root = path.into();
        self
    }

    /// Set the in-unit mount point of the sandbox root.
    pub fn mount_point(mut self, path: impl Into<String>) -> Self {
        self.config.mount_point = path.into();
        self
    }

    /// Set the interpreter program.
    pub fn interpreter(mut self, program: impl Into<String>) -> Self {
        self.config.interpreter = program.into();
        self
    }

    /// Set the maximum number of live units.
    pub fn max_units(mut self, max: usize) -> Self {
        self.config.max_units = max;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the acquire wait timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the acquire poll interval.
    pub fn acquire_poll_interval(mut self, interval: Duration) -> Self {
        self.config.acquire_poll_interval = interval;
        self
    }

    /// Set the idle reaper interval.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    /// Set the per-execution timeout.
    pub fn exec_timeout(mut self, timeout: Duration) -> Self {
        self.config.exec_timeout = timeout;
        self
    }

    /// Set the memory limit in bytes.
    pub fn memory_limit_bytes(mut self, bytes: i64) -> Self {
        self.config.memory_limit_bytes = bytes;
        self
    }

    /// Replace the environment deny list.
    pub fn env_deny_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.env_deny_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<EngineConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
