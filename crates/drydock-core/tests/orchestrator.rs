//! End-to-end request handling against a scripted runtime.

mod common;

use common::{temp_root, Behavior, ScriptedRuntime};
use drydock_core::{
    EngineConfig, ExecutionRequest, Orchestrator, Pool, SandboxFs, UnitState, STAGING_DIR,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runtime: Arc<ScriptedRuntime>,
    pool: Arc<Pool>,
    orchestrator: Arc<Orchestrator>,
    root: PathBuf,
}

impl Harness {
    fn new(tag: &str, behavior: Behavior, max_units: usize) -> Self {
        let root = temp_root(tag);
        let runtime = Arc::new(ScriptedRuntime::new(behavior).with_host_root(root.clone()));
        let config = EngineConfig::builder()
            .sandbox_root(&root)
            .max_units(max_units)
            .exec_timeout(Duration::from_millis(200))
            .acquire_timeout(Duration::from_millis(300))
            .acquire_poll_interval(Duration::from_millis(20))
            .build()
            .unwrap();
        let pool = Arc::new(Pool::new(runtime.clone(), &config));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&pool), &config));
        Self {
            runtime,
            pool,
            orchestrator,
            root,
        }
    }

    fn staged_dirs(&self) -> usize {
        std::fs::read_dir(self.root.join(STAGING_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

#[tokio::test]
async fn successful_run_returns_output() {
    let h = Harness::new("ok", Behavior::Exit { code: 0, output: "hello\n" }, 1);

    let result = h.orchestrator.run(ExecutionRequest::new("print('hello')")).await;

    assert!(result.success());
    assert_eq!(result.to_string(), "hello\n");
    let call = h.runtime.last_call().unwrap();
    assert_eq!(call.command[0], "python");
    assert!(call.command[1].starts_with("/code/.drydock-exec/exec-"));
    assert!(call.command[1].ends_with("/script.py"));
    assert_eq!(call.script.as_deref(), Some("print('hello')"));
}

#[tokio::test]
async fn nonzero_exit_keeps_unit() {
    let h = Harness::new("exit1", Behavior::Exit { code: 1, output: "boom\n" }, 1);

    let result = h.orchestrator.run(ExecutionRequest::new("raise SystemExit('boom')")).await;

    assert!(!result.success());
    assert!(result.failure.is_none());
    let text = result.to_string();
    assert!(text.contains('1'));
    assert!(text.contains("boom"));

    let status = h.pool.status();
    assert_eq!(status.total, 1);
    assert_eq!(status.units[0].state, UnitState::Available);
    assert_eq!(h.runtime.removed(), 0);
}

#[tokio::test]
async fn runtime_error_discards_unit() {
    let h = Harness::new("fail", Behavior::Fail("exec attach failed"), 1);

    let result = h.orchestrator.run(ExecutionRequest::new("print(1)")).await;

    assert!(!result.success());
    assert!(result.to_string().starts_with("Error executing code:"));
    assert!(result.to_string().contains("exec attach failed"));
    assert_eq!(h.pool.size(), 0);
    assert_eq!(h.runtime.removed(), 1);
}

#[tokio::test]
async fn timeout_discards_unit() {
    let h = Harness::new("hang", Behavior::Hang, 1);

    let result = h.orchestrator.run(ExecutionRequest::new("while True: pass")).await;

    assert_eq!(result.exit_code, -1);
    assert!(result.failure.as_deref().unwrap().contains("timed out"));
    assert_eq!(h.pool.size(), 0);
    assert_eq!(h.runtime.removed(), 1);

    // The next request gets a fresh unit.
    h.runtime.set_behavior(Behavior::Exit { code: 0, output: "ok\n" });
    let result = h.orchestrator.run(ExecutionRequest::new("print('ok')")).await;
    assert!(result.success());
    assert_eq!(h.runtime.created(), 2);
}

#[tokio::test]
async fn staged_script_is_removed() {
    let h = Harness::new("artifacts", Behavior::Exit { code: 0, output: "" }, 1);
    h.orchestrator.run(ExecutionRequest::new("x = 1")).await;
    assert_eq!(h.staged_dirs(), 0);

    h.runtime.set_behavior(Behavior::Hang);
    h.orchestrator.run(ExecutionRequest::new("x = 2")).await;
    assert_eq!(h.staged_dirs(), 0);
}

#[tokio::test]
async fn cancelled_run_removes_staged_script() {
    let h = Harness::new("cancel", Behavior::Hang, 1);

    let run = h.orchestrator.run(ExecutionRequest::new("while True: pass"));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), run).await;
    assert!(cancelled.is_err());

    assert_eq!(h.staged_dirs(), 0);
}

#[tokio::test]
async fn cleanup_spares_in_flight_scripts() {
    let h = Harness::new("cleanup", Behavior::Sleep(Duration::from_millis(100)), 1);
    let files = SandboxFs::new(&h.root).unwrap();
    files.write("user.txt", "data").unwrap();

    let orchestrator = Arc::clone(&h.orchestrator);
    let run = tokio::spawn(async move { orchestrator.run(ExecutionRequest::new("print(1)")).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.staged_dirs(), 1);
    assert_eq!(files.cleanup().unwrap(), 1);

    let result = run.await.unwrap();
    assert!(result.success(), "{result}");
    assert_eq!(result.to_string(), "done\n");
    assert!(!h.root.join("user.txt").exists());
}

#[tokio::test]
async fn host_environment_is_filtered() {
    let h = Harness::new("env", Behavior::Exit { code: 0, output: "" }, 1);

    let req = ExecutionRequest::new("import os")
        .with_env("HOSTNAME", "build-host")
        .with_env("PATH", "/usr/bin")
        .with_env("DRYDOCK_MAX_UNITS", "4")
        .with_env("DATABASE_URL", "postgres://db")
        .with_env("OPENAI_API_KEY", "sk-test");
    h.orchestrator.run(req).await;

    let env = h.runtime.last_call().unwrap().env;
    assert!(!env.contains_key("HOSTNAME"));
    assert!(!env.contains_key("PATH"));
    assert!(!env.contains_key("DRYDOCK_MAX_UNITS"));
    assert_eq!(env.get("DATABASE_URL").map(String::as_str), Some("postgres://db"));
    assert_eq!(env.get("OPENAI_API_KEY").map(String::as_str), Some("sk-test"));
}

#[tokio::test]
async fn saturated_pool_yields_failure_result() {
    let h = Harness::new("busy", Behavior::Exit { code: 0, output: "" }, 1);
    let held = h.pool.acquire().await.unwrap();

    let result = h.orchestrator.run(ExecutionRequest::new("print(1)")).await;

    assert!(!result.success());
    assert!(result.to_string().contains("capacity exceeded"));
    assert!(h.runtime.calls.lock().unwrap().is_empty());
    held.release(true).await;
}

#[tokio::test]
async fn unavailable_runtime_yields_failure_result() {
    let h = Harness::new("down", Behavior::Exit { code: 0, output: "" }, 1);
    h.runtime.fail_create.store(true, Ordering::SeqCst);

    let result = h.orchestrator.run(ExecutionRequest::new("print(1)")).await;

    assert!(result.to_string().contains("runtime unavailable"));
    assert_eq!(h.pool.status().reserved, 0);
    assert_eq!(h.staged_dirs(), 0);
}

#[tokio::test]
async fn concurrent_runs_never_share_a_unit() {
    let h = Harness::new("share", Behavior::Sleep(Duration::from_millis(20)), 2);

    let runs: Vec<_> = (0..6)
        .map(|i| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .run(ExecutionRequest::new(format!("print({i})")))
                    .await
            })
        })
        .collect();

    for run in runs {
        assert!(run.await.unwrap().success());
    }

    assert!(!h.runtime.overlap.load(Ordering::SeqCst));
    assert!(h.runtime.created() <= 2);
    assert_eq!(h.pool.status().available, h.pool.size());
}
