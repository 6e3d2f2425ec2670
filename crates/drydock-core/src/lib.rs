//! # drydock-core
//!
//! Container pool and execution orchestration for Drydock code sandboxes.
//!
//! Code snippets run inside short-lived, network-less, capability-stripped
//! containers. Creating a container is slow, so units are pooled: a request
//! reuses an idle unit when one exists, creates one when capacity allows, and
//! otherwise waits for one to free up.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    drydock-core (host)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │  Orchestrator   │────▶│  Pool                    │    │
//! │  │   - run()       │     │   - acquire() / release()│    │
//! │  └─────────────────┘     │   - evict_idle()         │    │
//! │           │              │   - destroy_all()        │    │
//! │           │ stage code   └──────────────────────────┘    │
//! │           ▼                  ▲            │              │
//! │  ┌─────────────────┐         │            ▼              │
//! │  │  sandbox root   │  ┌─────────────┐ ┌────────────────┐ │
//! │  │  (bind mount)   │  │ IdleReaper  │ │ContainerRuntime│ │
//! │  └─────────────────┘  └─────────────┘ │ (DockerRuntime)│ │
//! │                              ▲        └────────────────┘ │
//! │                 ┌────────────┴────────┐       │          │
//! │                 │ ShutdownCoordinator │       │          │
//! │                 └─────────────────────┘       │          │
//! └───────────────────────────────────────────────┼──────────┘
//!                                                 ▼
//!                                     ┌──────────────────────┐
//!                                     │  Docker daemon       │
//!                                     │  one container/unit  │
//!                                     └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use drydock_core::{
//!     DockerRuntime, EngineConfig, ExecutionRequest, Orchestrator, Pool, ShutdownCoordinator,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> drydock_core::Result<()> {
//! let config = EngineConfig::builder()
//!     .image("python:3.9-slim")
//!     .sandbox_root("/tmp/python_code_execution")
//!     .max_units(4)
//!     .build()?;
//!
//! let pool = Arc::new(Pool::new(Arc::new(DockerRuntime::connect()?), &config));
//! let orchestrator = Orchestrator::new(Arc::clone(&pool), &config);
//! let coordinator = ShutdownCoordinator::new(Arc::clone(&pool));
//! coordinator.start_reaper(config.reap_interval).await;
//!
//! let result = orchestrator
//!     .run(ExecutionRequest::new("print('Hello from sandbox!')"))
//!     .await;
//! println!("{result}");
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod docker;
mod env;
mod error;
mod fs;
mod orchestrator;
mod pool;
mod reaper;
mod runtime;
mod shutdown;
mod unit;

pub use config::{EngineConfig, EngineConfigBuilder, DEFAULT_ENV_DENY_PREFIXES};
pub use docker::DockerRuntime;
pub use env::filter_env;
pub use error::{CoreError, Result};
pub use fs::{format_size, FileEntry, SandboxFs, STAGING_DIR};
pub use orchestrator::{ExecutionRequest, ExecutionResult, Orchestrator};
pub use pool::{Pool, PoolConfig, PoolStats, PoolStatus, StatsSnapshot, UnitLease};
pub use reaper::IdleReaper;
pub use runtime::{
    ContainerRuntime, ExecOutput, Mount, ResourceLimits, RuntimeHandle, SecurityProfile, UnitSpec,
};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use unit::{UnitId, UnitInfo, UnitState};
