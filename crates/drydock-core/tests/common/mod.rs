//! Scripted in-memory runtime shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use drydock_core::{
    ContainerRuntime, CoreError, EngineConfig, ExecOutput, Result, RuntimeHandle, UnitSpec,
};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// What `exec` does when called.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exit with `code`, printing `output`.
    Exit { code: i64, output: &'static str },
    /// Raise a runtime error.
    Fail(&'static str),
    /// Never finish.
    Hang,
    /// Finish after a delay; exits 2 if the staged script vanished meanwhile.
    Sleep(Duration),
}

/// Everything the scripted runtime saw during one `exec` call.
#[derive(Debug, Clone)]
pub struct ExecCall {
    pub handle: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Contents of the staged script, read through the host side of the mount.
    pub script: Option<String>,
}

pub struct ScriptedRuntime {
    pub created: AtomicU64,
    pub removed: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<ExecCall>>,
    pub fail_create: AtomicBool,
    /// Set if two execs ever ran on the same unit at once.
    pub overlap: AtomicBool,
    create_delay: Duration,
    behavior: Mutex<Behavior>,
    active: Mutex<HashSet<String>>,
    host_root: Option<PathBuf>,
}

impl ScriptedRuntime {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            created: AtomicU64::new(0),
            removed: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            overlap: AtomicBool::new(false),
            create_delay: Duration::ZERO,
            behavior: Mutex::new(behavior),
            active: Mutex::new(HashSet::new()),
            host_root: None,
        }
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Resolve `/code/...` script paths against `root` when recording calls.
    pub fn with_host_root(mut self, root: PathBuf) -> Self {
        self.host_root = Some(root);
        self
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn removed(&self) -> usize {
        self.removed.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<ExecCall> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn create(&self, _spec: &UnitSpec) -> Result<RuntimeHandle> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CoreError::RuntimeUnavailable("daemon unreachable".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RuntimeHandle::new(format!("container-{n}")))
    }

    async fn exec(
        &self,
        handle: &RuntimeHandle,
        command: &[String],
        env: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        if !self.active.lock().unwrap().insert(handle.as_str().to_string()) {
            self.overlap.store(true, Ordering::SeqCst);
        }

        let script_path = match (&self.host_root, command.get(1)) {
            (Some(root), Some(path)) => path.strip_prefix("/code/").map(|rel| root.join(rel)),
            _ => None,
        };
        let script = script_path
            .as_ref()
            .and_then(|path| std::fs::read_to_string(path).ok());
        self.calls.lock().unwrap().push(ExecCall {
            handle: handle.as_str().to_string(),
            command: command.to_vec(),
            env: env.clone(),
            script,
        });

        let behavior = self.behavior.lock().unwrap().clone();
        let result = match behavior {
            Behavior::Exit { code, output } => Ok(ExecOutput {
                exit_code: code,
                output: Bytes::from_static(output.as_bytes()),
            }),
            Behavior::Fail(msg) => Err(CoreError::Execution(msg.into())),
            Behavior::Hang => std::future::pending::<Result<ExecOutput>>().await,
            Behavior::Sleep(delay) => {
                tokio::time::sleep(delay).await;
                // Like an interpreter that opens its script late.
                match script_path {
                    Some(path) if !path.exists() => Ok(ExecOutput {
                        exit_code: 2,
                        output: Bytes::from_static(b"can't open file\n"),
                    }),
                    _ => Ok(ExecOutput {
                        exit_code: 0,
                        output: Bytes::from_static(b"done\n"),
                    }),
                }
            }
        };

        self.active.lock().unwrap().remove(handle.as_str());
        result
    }

    async fn remove(&self, handle: &RuntimeHandle) -> Result<()> {
        self.removed.lock().unwrap().push(handle.as_str().to_string());
        Ok(())
    }
}

pub fn config(max_units: usize) -> EngineConfig {
    EngineConfig::builder()
        .max_units(max_units)
        .idle_timeout(Duration::from_secs(1))
        .acquire_timeout(Duration::from_secs(30))
        .build()
        .expect("valid test config")
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_root(tag: &str) -> PathBuf {
    let id = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "drydock-{tag}-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir.canonicalize().unwrap()
}
