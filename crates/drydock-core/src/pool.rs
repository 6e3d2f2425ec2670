//! Pool of reusable execution units.
//!
//! The pool owns every live unit and is the only place unit state changes.
//! Units are created on demand up to `max_units`, handed to one request at a
//! time, returned for reuse, and torn down when they go bad, sit idle too
//! long, or the process shuts down.
//!
//! # Concurrency
//!
//! All bookkeeping (unit map, states, capacity reservations) lives behind one
//! mutex that is never held across an `.await`. Creating a unit is slow, so a
//! capacity slot is reserved under the lock, the runtime call happens outside
//! it, and the slot is given back under the lock if creation fails. Requests
//! that find the pool saturated wait on a [`Notify`] that every release,
//! destroy and eviction signals, with a short poll interval as a backstop.
//!
//! # Example
//!
//! ```ignore
//! use drydock_core::{DockerRuntime, EngineConfig, Pool};
//! use std::sync::Arc;
//!
//! let config = EngineConfig::default();
//! let pool = Arc::new(Pool::new(Arc::new(DockerRuntime::connect()?), &config));
//!
//! let lease = pool.acquire().await?;
//! // ... run something against lease.handle() ...
//! lease.release(true).await;
//!
//! pool.destroy_all().await;
//! ```

use crate::config::EngineConfig;
use crate::error::{CoreError, Result};
use crate::runtime::{ContainerRuntime, RuntimeHandle, UnitSpec};
use crate::unit::{ExecutionUnit, UnitId, UnitInfo, UnitState};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

// ============================================================================
// Configuration
// ============================================================================

/// Capacity and timing knobs for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live units, busy or available.
    pub max_units: usize,
    /// Available units idle for longer than this are evicted.
    pub idle_timeout: Duration,
    /// How long `acquire` waits on a saturated pool before giving up.
    pub acquire_timeout: Duration,
    /// Backstop wake-up interval while waiting.
    pub poll_interval: Duration,
}

impl From<&EngineConfig> for PoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_units: config.max_units,
            idle_timeout: config.idle_timeout,
            acquire_timeout: config.acquire_timeout,
            poll_interval: config.acquire_poll_interval,
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Pool statistics for observability.
///
/// All counters are atomic and can be read without locking.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Units handed out from the available set.
    pub reused: AtomicU64,
    /// Units created by the runtime.
    pub created: AtomicU64,
    /// Units torn down for any reason.
    pub destroyed: AtomicU64,
    /// Units torn down by idle eviction.
    pub evicted: AtomicU64,
    /// Runtime create calls that failed.
    pub creation_failures: AtomicU64,
    /// Acquires that gave up on a saturated pool.
    pub capacity_timeouts: AtomicU64,
}

impl PoolStats {
    /// Get the number of reused units.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    /// Get the total units created.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Get the total units destroyed.
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::Relaxed)
    }

    /// Get the number of idle evictions.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Get the number of failed creations.
    pub fn creation_failures(&self) -> u64 {
        self.creation_failures.load(Ordering::Relaxed)
    }

    /// Get the number of capacity timeouts.
    pub fn capacity_timeouts(&self) -> u64 {
        self.capacity_timeouts.load(Ordering::Relaxed)
    }

    /// Share of successful acquires served by an existing unit, as a percentage.
    pub fn reuse_rate(&self) -> f64 {
        let reused = self.reused() as f64;
        let total = reused + self.created() as f64;
        if total == 0.0 {
            0.0
        } else {
            (reused / total) * 100.0
        }
    }

    /// Copy the counters into a serializable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reused: self.reused(),
            created: self.created(),
            destroyed: self.destroyed(),
            evicted: self.evicted(),
            creation_failures: self.creation_failures(),
            capacity_timeouts: self.capacity_timeouts(),
            reuse_rate: self.reuse_rate(),
        }
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub reused: u64,
    pub created: u64,
    pub destroyed: u64,
    pub evicted: u64,
    pub creation_failures: u64,
    pub capacity_timeouts: u64,
    pub reuse_rate: f64,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// Configured capacity.
    pub max_units: usize,
    /// Units currently tracked.
    pub total: usize,
    /// Units held by a request.
    pub busy: usize,
    /// Units ready for reuse.
    pub available: usize,
    /// Slots reserved by in-flight creations.
    pub reserved: usize,
    /// Whether shutdown has begun.
    pub closed: bool,
    /// Per-unit detail, ordered by id.
    pub units: Vec<UnitInfo>,
    /// Lifetime counters.
    pub stats: StatsSnapshot,
}

// ============================================================================
// Pool Implementation
// ============================================================================

#[derive(Debug, Default)]
struct PoolInner {
    units: HashMap<UnitId, ExecutionUnit>,
    /// Capacity slots held by creations running outside the lock.
    reserved: usize,
    next_id: u64,
    closed: bool,
}

impl PoolInner {
    fn occupied(&self) -> usize {
        self.units.len() + self.reserved
    }
}

enum Claim<'a> {
    Reused(UnitId, RuntimeHandle),
    Reserved(Reservation<'a>),
    Saturated,
}

/// A capacity slot held while a unit is being created.
///
/// Dropping it unused gives the slot back, so a failed or cancelled creation
/// never leaks capacity.
struct Reservation<'a> {
    pool: &'a Pool,
    armed: bool,
}

impl Reservation<'_> {
    /// Convert the slot into a tracked unit (or discard it if the pool closed).
    fn commit(mut self, handle: RuntimeHandle) -> Option<UnitId> {
        self.armed = false;
        let mut inner = self.pool.lock();
        inner.reserved -= 1;
        if inner.closed {
            return None;
        }
        inner.next_id += 1;
        let id = UnitId::new(inner.next_id);
        inner.units.insert(id, ExecutionUnit::new_busy(id, handle));
        Some(id)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.lock().reserved -= 1;
            self.pool.slot_freed.notify_one();
            tracing::debug!("Capacity reservation released");
        }
    }
}

/// Owned registry of execution units.
pub struct Pool {
    runtime: Arc<dyn ContainerRuntime>,
    spec: UnitSpec,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
    /// Signalled whenever a unit becomes available or capacity frees up.
    slot_freed: Notify,
    stats: PoolStats,
}

impl Pool {
    /// Create an empty pool. Units are created lazily by [`acquire`](Self::acquire).
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &EngineConfig) -> Self {
        let pool_config = PoolConfig::from(config);
        tracing::info!(
            max_units = pool_config.max_units,
            idle_timeout_secs = pool_config.idle_timeout.as_secs(),
            acquire_timeout_secs = pool_config.acquire_timeout.as_secs(),
            image = %config.image,
            "Creating execution pool"
        );

        Self {
            runtime,
            spec: UnitSpec::from_config(config),
            config: pool_config,
            inner: Mutex::new(PoolInner::default()),
            slot_freed: Notify::new(),
            stats: PoolStats::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        // Critical sections never leave the map half-updated, so a poisoned
        // lock still guards consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquire a unit for exclusive use.
    ///
    /// Reuses an available unit if there is one; otherwise creates a new unit
    /// if capacity permits; otherwise waits up to the acquire timeout for a
    /// unit or slot to free up.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CapacityExceeded`] if the pool stayed saturated for the whole wait
    /// - [`CoreError::RuntimeUnavailable`] if the runtime failed to create a unit
    /// - [`CoreError::ShuttingDown`] once [`destroy_all`](Self::destroy_all) has run
    pub async fn acquire(self: &Arc<Self>) -> Result<UnitLease> {
        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let mut waiting = false;

        loop {
            // Register interest before looking, so a release between the
            // check and the wait is not missed.
            let notified = self.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_claim()? {
                Claim::Reused(id, handle) => {
                    self.stats.reused.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        unit_id = %id,
                        container_id = %handle,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Reusing available unit"
                    );
                    return Ok(UnitLease::new(Arc::clone(self), id, handle));
                }
                Claim::Reserved(reservation) => {
                    return self.create_unit(reservation).await;
                }
                Claim::Saturated => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.stats.capacity_timeouts.fetch_add(1, Ordering::Relaxed);
                let waited = now.duration_since(started);
                tracing::warn!(
                    max_units = self.config.max_units,
                    waited_ms = waited.as_millis() as u64,
                    "No execution unit became available"
                );
                return Err(CoreError::CapacityExceeded {
                    max_units: self.config.max_units,
                    waited,
                });
            }

            if !waiting {
                tracing::debug!(max_units = self.config.max_units, "Pool saturated, waiting");
                waiting = true;
            }

            let wake_at = (now + self.config.poll_interval).min(deadline);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    fn try_claim(&self) -> Result<Claim<'_>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(CoreError::ShuttingDown);
        }

        // Prefer the most recently used unit so older ones age out.
        if let Some(unit) = inner
            .units
            .values_mut()
            .filter(|u| u.state == UnitState::Available)
            .max_by_key(|u| u.last_used_at)
        {
            unit.state = UnitState::Busy;
            unit.last_used_at = Instant::now();
            return Ok(Claim::Reused(unit.id, unit.handle.clone()));
        }

        if inner.occupied() < self.config.max_units {
            inner.reserved += 1;
            return Ok(Claim::Reserved(Reservation {
                pool: self,
                armed: true,
            }));
        }

        Ok(Claim::Saturated)
    }

    async fn create_unit(self: &Arc<Self>, reservation: Reservation<'_>) -> Result<UnitLease> {
        let start = Instant::now();
        tracing::debug!("Creating execution unit");

        let handle = match self.runtime.create(&self.spec).await {
            Ok(handle) => handle,
            Err(e) => {
                self.stats.creation_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, "Execution unit creation failed");
                drop(reservation);
                return Err(match e {
                    CoreError::RuntimeUnavailable(msg) => CoreError::RuntimeUnavailable(msg),
                    other => CoreError::RuntimeUnavailable(other.to_string()),
                });
            }
        };

        match reservation.commit(handle.clone()) {
            Some(id) => {
                self.stats.created.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    unit_id = %id,
                    container_id = %handle,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Execution unit created"
                );
                Ok(UnitLease::new(Arc::clone(self), id, handle))
            }
            None => {
                tracing::debug!(container_id = %handle, "Shutdown during creation, destroying");
                if let Err(e) = self.runtime.remove(&handle).await {
                    tracing::error!(container_id = %handle, error = %e, "Failed to destroy orphaned unit");
                }
                Err(CoreError::ShuttingDown)
            }
        }
    }

    /// Return a unit to the pool.
    ///
    /// A usable unit becomes available again. An unusable one is removed and
    /// destroyed; it no longer counts against capacity. Releasing a unit the
    /// pool no longer tracks (already destroyed, evicted or shut down) is a
    /// no-op, so failure paths may call this freely.
    pub async fn release(&self, id: UnitId, usable: bool) {
        if usable {
            let returned = {
                let mut inner = self.lock();
                match inner.units.get_mut(&id) {
                    Some(unit) if unit.state == UnitState::Busy => {
                        unit.state = UnitState::Available;
                        unit.last_used_at = Instant::now();
                        true
                    }
                    Some(_) => {
                        tracing::warn!(unit_id = %id, "Released a unit that was not busy");
                        false
                    }
                    None => false,
                }
            };
            if returned {
                tracing::debug!(unit_id = %id, "Unit returned to pool");
                self.slot_freed.notify_one();
            } else {
                tracing::debug!(unit_id = %id, "Release ignored, unit not held");
            }
            return;
        }

        // Whoever removes the unit from the map is the only one to destroy it.
        let removed = self.lock().units.remove(&id);
        match removed {
            Some(unit) => {
                self.slot_freed.notify_one();
                tracing::info!(unit_id = %id, container_id = %unit.handle, "Discarding unusable unit");
                self.destroy_unit(unit).await;
            }
            None => {
                tracing::debug!(unit_id = %id, "Discard ignored, unit already gone");
            }
        }
    }

    /// Evict every available unit idle for longer than the idle timeout.
    ///
    /// Busy units are never touched. Returns the number of units removed.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let victims: Vec<ExecutionUnit> = {
            let mut inner = self.lock();
            let ids: Vec<UnitId> = inner
                .units
                .values()
                .filter(|u| u.is_idle_past(now, self.config.idle_timeout))
                .map(|u| u.id)
                .collect();
            ids.iter().filter_map(|id| inner.units.remove(id)).collect()
        };

        if victims.is_empty() {
            tracing::trace!("No idle units to evict");
            return 0;
        }

        let count = victims.len();
        self.slot_freed.notify_waiters();
        tracing::info!(count, "Evicting idle units");
        for unit in victims {
            self.stats.evicted.fetch_add(1, Ordering::Relaxed);
            self.destroy_unit(unit).await;
        }
        count
    }

    /// Close the pool and destroy every tracked unit, busy or not.
    ///
    /// Failures on individual units are logged and do not stop the teardown.
    /// Returns the number of units destroyed successfully.
    pub async fn destroy_all(&self) -> usize {
        let units: Vec<ExecutionUnit> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.units.drain().map(|(_, unit)| unit).collect()
        };
        // Wake waiters so they observe the closed pool.
        self.slot_freed.notify_waiters();

        let count = units.len();
        tracing::info!(count, "Destroying all execution units");

        let mut destroyed = 0;
        for unit in units {
            if self.destroy_unit(unit).await {
                destroyed += 1;
            }
        }

        tracing::info!(
            destroyed,
            failed = count - destroyed,
            created = self.stats.created(),
            reused = self.stats.reused(),
            reuse_rate = format!("{:.1}%", self.stats.reuse_rate()),
            "Pool teardown complete"
        );
        destroyed
    }

    async fn destroy_unit(&self, unit: ExecutionUnit) -> bool {
        self.stats.destroyed.fetch_add(1, Ordering::Relaxed);
        match self.runtime.remove(&unit.handle).await {
            Ok(()) => {
                tracing::debug!(unit_id = %unit.id, container_id = %unit.handle, "Unit destroyed");
                true
            }
            Err(e) => {
                tracing::error!(
                    unit_id = %unit.id,
                    container_id = %unit.handle,
                    error = %e,
                    "Failed to destroy unit"
                );
                false
            }
        }
    }

    /// Drop a unit from the books without calling the runtime.
    fn forget(&self, id: UnitId) -> Option<ExecutionUnit> {
        let removed = self.lock().units.remove(&id);
        if removed.is_some() {
            self.slot_freed.notify_one();
        }
        removed
    }

    /// Get the number of tracked units.
    pub fn size(&self) -> usize {
        self.lock().units.len()
    }

    /// Take a snapshot of occupancy and counters.
    pub fn status(&self) -> PoolStatus {
        let inner = self.lock();
        let mut units: Vec<UnitInfo> = inner.units.values().map(ExecutionUnit::info).collect();
        units.sort_by_key(|u| u.id);
        let busy = units.iter().filter(|u| u.state == UnitState::Busy).count();

        PoolStatus {
            max_units: self.config.max_units,
            total: units.len(),
            busy,
            available: units.len() - busy,
            reserved: inner.reserved,
            closed: inner.closed,
            units,
            stats: self.stats.snapshot(),
        }
    }

    /// Get the runtime units are created with.
    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }
}

// ============================================================================
// Lease
// ============================================================================

/// Exclusive hold on one busy unit.
///
/// Call [`release`](Self::release) when done. A lease dropped without being
/// released (panic, cancelled request) discards its unit in the background,
/// since whatever was running in it may still be.
pub struct UnitLease {
    pool: Arc<Pool>,
    id: UnitId,
    handle: RuntimeHandle,
    released: bool,
}

impl UnitLease {
    fn new(pool: Arc<Pool>, id: UnitId, handle: RuntimeHandle) -> Self {
        Self {
            pool,
            id,
            handle,
            released: false,
        }
    }

    /// Get the pool handle of the held unit.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Get the runtime handle of the held unit.
    pub fn handle(&self) -> &RuntimeHandle {
        &self.handle
    }

    /// Give the unit back, keeping it for reuse only if `usable`.
    pub async fn release(mut self, usable: bool) {
        self.released = true;
        self.pool.release(self.id, usable).await;
    }
}

impl Drop for UnitLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(unit_id = %self.id, "Lease dropped without release, discarding unit");
        let pool = Arc::clone(&self.pool);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    pool.release(id, false).await;
                });
            }
            Err(_) => {
                if let Some(unit) = pool.forget(id) {
                    tracing::error!(
                        unit_id = %id,
                        container_id = %unit.handle,
                        "No async runtime to destroy unit, container leaked"
                    );
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
