//! Shared fixtures for unit tests.

use crate::{DrydockConfig, DrydockServer};
use async_trait::async_trait;
use drydock_core::{ContainerRuntime, ExecOutput, Result, RuntimeHandle, UnitSpec};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echoes the command it was asked to run as the output.
pub(crate) struct EchoRuntime;

#[async_trait]
impl ContainerRuntime for EchoRuntime {
    async fn create(&self, _spec: &UnitSpec) -> Result<RuntimeHandle> {
        Ok(RuntimeHandle::new("echo"))
    }

    async fn exec(
        &self,
        _handle: &RuntimeHandle,
        command: &[String],
        _env: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        Ok(ExecOutput {
            exit_code: 0,
            output: command.join(" ").into_bytes().into(),
        })
    }

    async fn remove(&self, _handle: &RuntimeHandle) -> Result<()> {
        Ok(())
    }
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Server over a fresh temporary code directory. Returns the directory to
/// remove afterwards.
pub(crate) fn test_server() -> (DrydockServer, PathBuf) {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "drydock-mcp-test-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    let config = DrydockConfig {
        code_dir: dir.join("code"),
        ..Default::default()
    };
    let server = DrydockServer::new(config, Arc::new(EchoRuntime)).unwrap();
    (server, dir)
}
