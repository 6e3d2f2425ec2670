//! Drives one code-execution request against a pooled unit.

use crate::config::EngineConfig;
use crate::env::filter_env;
use crate::error::{CoreError, Result};
use crate::fs::STAGING_DIR;
use crate::pool::{Pool, UnitLease};
use crate::runtime::{ContainerRuntime, ExecOutput};
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// File name of the staged script inside its per-execution directory.
const SCRIPT_NAME: &str = "script.py";

/// Code to run plus the environment offered to it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Source code passed to the interpreter.
    pub code: String,
    /// Candidate environment; the orchestrator strips denied variables.
    pub env: BTreeMap<String, String>,
}

impl ExecutionRequest {
    /// Request with an empty environment.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            env: BTreeMap::new(),
        }
    }

    /// Request offering the whole host environment.
    pub fn from_host_env(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            env: std::env::vars().collect(),
        }
    }

    /// Add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one execution request.
///
/// `failure` is set when the code could not be run to completion (no unit,
/// runtime error, timeout). A non-zero exit code alone is not a failure of
/// the execution machinery and leaves `failure` empty.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Process exit code (-1 when the process never reported one).
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: Bytes,
    /// What went wrong, if the run did not complete.
    pub failure: Option<String>,
}

impl ExecutionResult {
    fn completed(output: ExecOutput) -> Self {
        Self {
            exit_code: output.exit_code,
            output: output.output,
            failure: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            exit_code: -1,
            output: Bytes::new(),
            failure: Some(reason.into()),
        }
    }

    /// Check if the code ran and exited 0.
    pub fn success(&self) -> bool {
        self.failure.is_none() && self.exit_code == 0
    }

    /// Output decoded as UTF-8, lossily.
    pub fn output_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let output = self.output_text();
        match &self.failure {
            Some(reason) => {
                write!(f, "Error executing code: {reason}")?;
                if !output.is_empty() {
                    write!(f, "\n\n{output}")?;
                }
                Ok(())
            }
            None if self.exit_code == 0 => write!(f, "{output}"),
            None => write!(
                f,
                "Error: process exited with code {}\n\n{output}",
                self.exit_code
            ),
        }
    }
}

/// A script written into the staging directory for one execution.
///
/// Dropping it without [`StagedScript::remove`] (a cancelled request)
/// still deletes the directory, synchronously.
struct StagedScript {
    host_dir: PathBuf,
    unit_path: String,
    removed: bool,
}

impl StagedScript {
    /// Best-effort removal; failures are logged only.
    async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.host_dir).await {
            Ok(()) => tracing::trace!(path = %self.host_dir.display(), "Removed staged script"),
            Err(e) => tracing::warn!(
                path = %self.host_dir.display(),
                error = %e,
                "Failed to remove staged script"
            ),
        }
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        if !self.removed {
            tracing::debug!(path = %self.host_dir.display(), "Removing abandoned staged script");
            let _ = std::fs::remove_dir_all(&self.host_dir);
        }
    }
}

/// Runs execution requests: acquire, stage, execute, clean up, release.
pub struct Orchestrator {
    pool: Arc<Pool>,
    runtime: Arc<dyn ContainerRuntime>,
    sandbox_root: PathBuf,
    mount_point: String,
    interpreter: String,
    exec_timeout: Duration,
    env_deny_prefixes: Vec<String>,
}

impl Orchestrator {
    /// Create an orchestrator over `pool`, using the same runtime the pool does.
    pub fn new(pool: Arc<Pool>, config: &EngineConfig) -> Self {
        Self {
            runtime: Arc::clone(pool.runtime()),
            pool,
            sandbox_root: config.sandbox_root.clone(),
            mount_point: config.mount_point.trim_end_matches('/').to_string(),
            interpreter: config.interpreter.clone(),
            exec_timeout: config.exec_timeout,
            env_deny_prefixes: config.env_deny_prefixes.clone(),
        }
    }

    /// Get the pool this orchestrator draws units from.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Run one request to completion.
    ///
    /// Never fails: every problem is reported through
    /// [`ExecutionResult::failure`]. The unit is always released, and is
    /// kept for reuse only if the runtime did not raise or time out.
    pub async fn run(&self, req: ExecutionRequest) -> ExecutionResult {
        let start = Instant::now();

        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(error = %e, "Could not acquire execution unit");
                return ExecutionResult::failed(e.to_string());
            }
        };
        let unit_id = lease.id();

        let outcome = self.run_in(&lease, &req).await;
        let usable = match &outcome {
            Ok(_) => true,
            Err(e) => !e.poisons_unit(),
        };
        lease.release(usable).await;

        match outcome {
            Ok(output) => {
                tracing::info!(
                    unit_id = %unit_id,
                    exit_code = output.exit_code,
                    output_len = output.output.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Execution completed"
                );
                ExecutionResult::completed(output)
            }
            Err(e) => {
                tracing::warn!(
                    unit_id = %unit_id,
                    error = %e,
                    unit_discarded = !usable,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Execution failed"
                );
                ExecutionResult::failed(e.to_string())
            }
        }
    }

    async fn run_in(&self, lease: &UnitLease, req: &ExecutionRequest) -> Result<ExecOutput> {
        let script = self.stage(&req.code).await?;
        let env = filter_env(req.env.clone(), &self.env_deny_prefixes);
        let command = vec![self.interpreter.clone(), script.unit_path.clone()];

        tracing::debug!(
            unit_id = %lease.id(),
            container_id = %lease.handle(),
            code_len = req.code.len(),
            env_vars = env.len(),
            script = %script.unit_path,
            "Running staged script"
        );

        let exec = self
            .runtime
            .exec(lease.handle(), &command, &env, self.exec_timeout);
        let result = match tokio::time::timeout(self.exec_timeout, exec).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ExecTimeout(self.exec_timeout)),
        };

        script.remove().await;
        result
    }

    async fn stage(&self, code: &str) -> Result<StagedScript> {
        let dir_name = format!("exec-{}", Uuid::new_v4().simple());
        let host_dir = self.sandbox_root.join(STAGING_DIR).join(&dir_name);
        tokio::fs::create_dir_all(&host_dir).await?;

        let staged = StagedScript {
            unit_path: format!(
                "{}/{}/{}/{}",
                self.mount_point, STAGING_DIR, dir_name, SCRIPT_NAME
            ),
            host_dir,
            removed: false,
        };
        if let Err(e) = tokio::fs::write(staged.host_dir.join(SCRIPT_NAME), code).await {
            staged.remove().await;
            return Err(e.into());
        }
        tracing::trace!(path = %staged.host_dir.display(), "Staged script");
        Ok(staged)
    }
}
