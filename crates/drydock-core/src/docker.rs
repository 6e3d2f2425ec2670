//! Docker-backed runtime collaborator.
//!
//! Each execution unit is a long-lived container running a keep-alive
//! process; code runs inside it through `docker exec`.

use crate::error::{CoreError, Result};
use crate::runtime::{ContainerRuntime, ExecOutput, RuntimeHandle, UnitSpec};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

/// Maximum captured output in bytes (1 MB).
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Marker appended when output is cut at [`MAX_OUTPUT_SIZE`].
const TRUNCATION_MARKER: &[u8] = b"\n... [output truncated]";

/// Label set on every container this runtime creates.
const UNIT_LABEL: &str = "io.drydock.unit";

/// Runtime collaborator backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket).
    ///
    /// No request is made; use [`ping`](Self::ping) to check reachability.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| CoreError::RuntimeUnavailable(format!("docker connect: {e}")))?;
        Ok(Self { docker })
    }

    /// Wrap an already-configured client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check that the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| CoreError::RuntimeUnavailable(format!("docker ping: {e}")))
    }

    async fn force_remove(&self, id: &str) -> std::result::Result<(), DockerError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::debug!(container_id = %id, "Container already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn host_config(spec: &UnitSpec) -> HostConfig {
    let security = &spec.security;
    HostConfig {
        binds: Some(spec.mounts.iter().map(|m| m.to_bind()).collect()),
        memory: Some(spec.limits.memory_bytes),
        memory_swap: Some(spec.limits.memory_bytes),
        cap_drop: security
            .drop_all_capabilities
            .then(|| vec!["ALL".to_string()]),
        security_opt: security
            .no_new_privileges
            .then(|| vec!["no-new-privileges".to_string()]),
        network_mode: security.network_disabled.then(|| "none".to_string()),
        ..Default::default()
    }
}

fn env_pairs(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

/// Append `chunk` to `buf`, keeping at most [`MAX_OUTPUT_SIZE`] bytes.
///
/// Returns false once the limit has been hit.
fn append_capped(buf: &mut BytesMut, chunk: &[u8]) -> bool {
    let room = MAX_OUTPUT_SIZE.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.extend_from_slice(chunk);
        return true;
    }
    buf.extend_from_slice(&chunk[..room]);
    buf.extend_from_slice(TRUNCATION_MARKER);
    false
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &UnitSpec) -> Result<RuntimeHandle> {
        let name = format!("drydock-{}", Uuid::new_v4().simple());
        let start = std::time::Instant::now();
        tracing::debug!(name = %name, image = %spec.image, "Creating container");

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            env: Some(env_pairs(&spec.env)),
            working_dir: spec.working_dir.clone(),
            network_disabled: Some(spec.security.network_disabled),
            labels: Some(HashMap::from([(UNIT_LABEL.to_string(), "true".to_string())])),
            host_config: Some(host_config(spec)),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| {
                tracing::warn!(name = %name, error = %e, "Container creation failed");
                CoreError::RuntimeUnavailable(format!("create container: {e}"))
            })?;

        for warning in &created.warnings {
            tracing::warn!(container_id = %created.id, warning = %warning, "Docker warning");
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            tracing::warn!(container_id = %created.id, error = %e, "Container start failed");
            if let Err(cleanup) = self.force_remove(&created.id).await {
                tracing::error!(container_id = %created.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(CoreError::RuntimeUnavailable(format!("start container: {e}")));
        }

        let handle = RuntimeHandle::new(created.id);
        tracing::info!(
            container_id = %handle,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Container started"
        );
        Ok(handle)
    }

    async fn exec(
        &self,
        handle: &RuntimeHandle,
        command: &[String],
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        tracing::debug!(container_id = %handle, cmd = ?command, "Creating exec");
        let exec = self
            .docker
            .create_exec(
                handle.as_str(),
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    env: Some(env_pairs(env)),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| CoreError::Execution(format!("create exec: {e}")))?;

        let collect = async {
            let mut buf = BytesMut::new();
            if let StartExecResults::Attached { mut output, .. } =
                self.docker.start_exec(&exec.id, None).await?
            {
                let mut capturing = true;
                while let Some(chunk) = output.next().await {
                    let chunk = chunk?;
                    // Keep draining after the cap so the process is not blocked on a full pipe.
                    if capturing {
                        capturing = append_capped(&mut buf, &chunk.into_bytes());
                    }
                }
            }
            Ok::<Bytes, DockerError>(buf.freeze())
        };

        let output = match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(container_id = %handle, error = %e, "Exec stream failed");
                return Err(CoreError::Execution(format!("exec stream: {e}")));
            }
            Err(_) => {
                tracing::warn!(container_id = %handle, timeout_secs = timeout.as_secs(), "Exec timed out");
                return Err(CoreError::ExecTimeout(timeout));
            }
        };

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| CoreError::Execution(format!("inspect exec: {e}")))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        tracing::debug!(
            container_id = %handle,
            exit_code,
            output_len = output.len(),
            "Exec completed"
        );
        Ok(ExecOutput { exit_code, output })
    }

    async fn remove(&self, handle: &RuntimeHandle) -> Result<()> {
        tracing::debug!(container_id = %handle, "Removing container");
        self.force_remove(handle.as_str())
            .await
            .map_err(|e| CoreError::RuntimeUnavailable(format!("remove container: {e}")))
    }
}
