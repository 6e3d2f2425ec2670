//! Runtime collaborator interface.
//!
//! The pool and orchestrator only ever talk to a [`ContainerRuntime`]. The
//! runtime owns the isolated process and filesystem behind each unit; the
//! core holds an opaque [`RuntimeHandle`] to it.

use crate::config::EngineConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Opaque reference to an isolated unit inside the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeHandle(String);

impl RuntimeHandle {
    /// Wrap a runtime-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the runtime identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Docker ids are 64 hex chars; the short form is what `docker ps` shows.
        let short = self.0.get(..12).unwrap_or(&self.0);
        write!(f, "{short}")
    }
}

/// Host directory exposed inside a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Absolute host path.
    pub host_path: PathBuf,
    /// Absolute path inside the unit.
    pub unit_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// Render as a `host:unit[:ro]` bind specification.
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host_path.display(), self.unit_path, mode)
    }
}

/// Resource bounds applied to each unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory limit in bytes; swap is capped to the same value.
    pub memory_bytes: i64,
}

/// Isolation switches applied to each unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityProfile {
    /// Drop every Linux capability.
    pub drop_all_capabilities: bool,
    /// Forbid privilege escalation via setuid binaries.
    pub no_new_privileges: bool,
    /// No network interfaces besides loopback.
    pub network_disabled: bool,
}

impl SecurityProfile {
    /// Everything switched on.
    pub fn locked_down() -> Self {
        Self {
            drop_all_capabilities: true,
            no_new_privileges: true,
            network_disabled: true,
        }
    }
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self::locked_down()
    }
}

/// Everything the runtime needs to create one unit.
#[derive(Debug, Clone)]
pub struct UnitSpec {
    /// Image reference.
    pub image: String,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Resource bounds.
    pub limits: ResourceLimits,
    /// Isolation profile.
    pub security: SecurityProfile,
    /// Environment set at creation time.
    pub env: BTreeMap<String, String>,
    /// Working directory inside the unit.
    pub working_dir: Option<String>,
}

impl UnitSpec {
    /// Derive the unit template from the engine configuration: the sandbox
    /// root mounted writable at the mount point, fully locked down.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            image: config.image.clone(),
            mounts: vec![Mount {
                host_path: config.sandbox_root.clone(),
                unit_path: config.mount_point.clone(),
                read_only: false,
            }],
            limits: ResourceLimits {
                memory_bytes: config.memory_limit_bytes,
            },
            security: SecurityProfile::locked_down(),
            env: BTreeMap::new(),
            working_dir: Some(config.mount_point.clone()),
        }
    }
}

/// Outcome of a command run inside a unit.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Process exit code (-1 if the runtime could not report one).
    pub exit_code: i64,
    /// Stdout and stderr, interleaved in arrival order.
    pub output: Bytes,
}

/// An external system that provides isolated process execution.
///
/// Implementations must be safe to call concurrently for distinct handles.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a new isolated unit.
    async fn create(&self, spec: &UnitSpec) -> Result<RuntimeHandle>;

    /// Run `command` inside the unit, bounded by `timeout`.
    async fn exec(
        &self,
        handle: &RuntimeHandle,
        command: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Tear the unit down. Removing an already-gone unit is not an error.
    async fn remove(&self, handle: &RuntimeHandle) -> Result<()>;
}
