//! Execution unit records owned by the pool.

use crate::runtime::RuntimeHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::time::Instant;

/// Stable handle for a unit, allocated by the pool and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Availability of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitState {
    /// Idle and ready to be handed out.
    Available,
    /// Held by exactly one request.
    Busy,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Busy => write!(f, "Busy"),
        }
    }
}

/// One isolated sandbox instance tracked by the pool.
///
/// Only [`Pool`](crate::Pool) methods mutate these, under the pool lock.
#[derive(Debug, Clone)]
pub(crate) struct ExecutionUnit {
    pub(crate) id: UnitId,
    pub(crate) handle: RuntimeHandle,
    pub(crate) state: UnitState,
    pub(crate) last_used_at: Instant,
    pub(crate) created_at: DateTime<Utc>,
}

impl ExecutionUnit {
    pub(crate) fn new_busy(id: UnitId, handle: RuntimeHandle) -> Self {
        Self {
            id,
            handle,
            state: UnitState::Busy,
            last_used_at: Instant::now(),
            created_at: Utc::now(),
        }
    }

    /// Whether an available unit has sat idle for strictly longer than `timeout`.
    pub(crate) fn is_idle_past(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.state == UnitState::Available
            && now.saturating_duration_since(self.last_used_at) > timeout
    }

    pub(crate) fn info(&self) -> UnitInfo {
        UnitInfo {
            id: self.id,
            container_id: self.handle.to_string(),
            state: self.state,
            created_at: self.created_at,
            idle_ms: match self.state {
                UnitState::Available => self.last_used_at.elapsed().as_millis() as u64,
                UnitState::Busy => 0,
            },
        }
    }
}

/// Read-only view of a unit for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct UnitInfo {
    /// Pool handle.
    pub id: UnitId,
    /// Short runtime identifier.
    pub container_id: String,
    /// Current state.
    pub state: UnitState,
    /// When the unit was created.
    pub created_at: DateTime<Utc>,
    /// Milliseconds since last release (0 while busy).
    pub idle_ms: u64,
}
