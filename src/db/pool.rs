//! Connection pool management.
//!
//! A bounded pool of physical connections, generic over how connections are
//! opened, tested and closed ([`ManageConnection`]).
//!
//! # Design Decisions
//!
//! - **`OnceCell` for initialization**: the first `acquire()` (or `init()`)
//!   fills the pool with `initial_size` connections exactly once, even under
//!   concurrent first use
//! - **`Semaphore` with `max_size` permits**: bounds checked-out connections;
//!   the permit travels with the [`PooledConnection`] and is released only
//!   after the connection is back in the idle set
//! - **`AtomicU32` slot counter**: every live or in-flight connection holds a
//!   slot, so the physical count never exceeds `max_size`
//! - **`parking_lot::Mutex` for the idle set**: never held across an await
//! - **Maintenance task with a `Weak` reference**: exits when the last pool
//!   handle is dropped
//!
//! # Lifecycle
//!
//! `Uninitialized -> Initializing -> Ready -> Broken? -> Shutdown`. A broken
//! pool refuses every request with [`DbError::PoolBroken`]; a shut down pool
//! refuses them with [`DbError::PoolClosed`].

use crate::config::{
    DEFAULT_ACQUIRE_INCREMENT, DEFAULT_ACQUIRE_RETRY_ATTEMPTS, DEFAULT_ACQUIRE_RETRY_DELAY_MS,
    DEFAULT_CHECKOUT_TIMEOUT_MS, DEFAULT_IDLE_TEST_PERIOD_SECS, DEFAULT_INITIAL_SIZE,
    DEFAULT_MAX_IDLE_TIME_SECS, DEFAULT_MAX_SIZE,
};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OnceCell, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long a checkout waits for an in-flight connection before re-checking.
const SLOT_WAIT_INTERVAL: Duration = Duration::from_millis(50);

/// Opens, tests and closes physical connections for a [`Pool`].
#[async_trait]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open one new physical connection.
    async fn connect(&self) -> DbResult<Self::Connection>;

    /// Liveness test used on checkout, checkin and by the maintenance task.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Close a connection that leaves the pool.
    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Resolved pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub initial_size: u32,
    pub max_size: u32,
    pub acquire_increment: u32,
    /// 0 = retry forever
    pub acquire_retry_attempts: u32,
    pub acquire_retry_delay: Duration,
    /// Zero disables idle connection testing.
    pub idle_test_period: Duration,
    /// Zero keeps idle connections forever.
    pub max_idle_time: Duration,
    /// Bounds a checkout, including connect retries made on its behalf.
    /// Zero waits forever.
    pub checkout_timeout: Duration,
    pub test_on_checkout: bool,
    pub test_on_checkin: bool,
    pub break_after_acquire_failure: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            max_size: DEFAULT_MAX_SIZE,
            acquire_increment: DEFAULT_ACQUIRE_INCREMENT,
            acquire_retry_attempts: DEFAULT_ACQUIRE_RETRY_ATTEMPTS,
            acquire_retry_delay: Duration::from_millis(DEFAULT_ACQUIRE_RETRY_DELAY_MS),
            idle_test_period: Duration::from_secs(DEFAULT_IDLE_TEST_PERIOD_SECS),
            max_idle_time: Duration::from_secs(DEFAULT_MAX_IDLE_TIME_SECS),
            checkout_timeout: Duration::from_millis(DEFAULT_CHECKOUT_TIMEOUT_MS),
            test_on_checkout: false,
            test_on_checkin: false,
            break_after_acquire_failure: false,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> DbResult<()> {
        if self.max_size == 0 {
            return Err(DbError::configuration("max_size must be greater than 0"));
        }
        if self.acquire_increment == 0 {
            return Err(DbError::configuration(
                "acquire_increment must be greater than 0",
            ));
        }
        if self.initial_size > self.max_size {
            return Err(DbError::configuration(format!(
                "initial_size ({}) cannot exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Interval of the maintenance task, if any maintenance is configured.
    fn maintenance_interval(&self) -> Option<Duration> {
        if !self.idle_test_period.is_zero() {
            Some(self.idle_test_period)
        } else if !self.max_idle_time.is_zero() {
            Some(self.max_idle_time)
        } else {
            None
        }
    }
}

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    /// Connect attempts were exhausted with `break_after_acquire_failure`.
    Broken,
    Shutdown,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub idle: u32,
    /// Number of connections currently checked out (or being created/tested).
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

struct IdleConnection<C> {
    conn: C,
    idle_since: Instant,
}

struct Lifecycle {
    state: PoolState,
    broken_reason: Option<String>,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    idle: Mutex<VecDeque<IdleConnection<M::Connection>>>,
    /// Wakes checkouts waiting for an in-flight connection to land.
    idle_notify: Notify,
    semaphore: Arc<Semaphore>,
    /// Live plus in-flight physical connections.
    slots: AtomicU32,
    lifecycle: Mutex<Lifecycle>,
    init: OnceCell<()>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl<M: ManageConnection> Drop for PoolInner<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
        self.semaphore.close();
    }
}

/// Shared handle to a connection pool. Cloning is cheap.
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ManageConnection> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("state", &self.state())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create a pool. No connection is opened until first use.
    pub fn new(manager: M, config: PoolConfig) -> DbResult<Self> {
        config.validate()?;
        let max_size = config.max_size as usize;
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                config,
                idle: Mutex::new(VecDeque::new()),
                idle_notify: Notify::new(),
                semaphore: Arc::new(Semaphore::new(max_size)),
                slots: AtomicU32::new(0),
                lifecycle: Mutex::new(Lifecycle {
                    state: PoolState::Uninitialized,
                    broken_reason: None,
                }),
                init: OnceCell::new(),
                maintenance: Mutex::new(None),
            }),
        })
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn state(&self) -> PoolState {
        self.inner.lifecycle.lock().state
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.lock().len() as u32;
        let total = self.inner.slots.load(Ordering::Acquire);
        PoolStatus {
            idle,
            in_use: total.saturating_sub(idle),
            total,
            max: self.inner.config.max_size,
        }
    }

    /// Initialize the pool if it has not been initialized yet.
    ///
    /// Concurrent callers wait for a single initialization. A failed
    /// initialization is retried by the next caller.
    pub async fn init(&self) -> DbResult<()> {
        self.check_open()?;
        self.inner
            .init
            .get_or_try_init(|| self.initialize())
            .await?;
        Ok(())
    }

    async fn initialize(&self) -> DbResult<()> {
        self.transition(PoolState::Uninitialized, PoolState::Initializing);
        let config = &self.inner.config;
        info!(
            initial_size = config.initial_size,
            max_size = config.max_size,
            "Initializing connection pool"
        );

        for _ in 0..config.initial_size {
            if !self.try_reserve_slot() {
                break;
            }
            match self.connect_with_retry(None).await {
                Ok(conn) => {
                    if let Some(conn) = self.push_idle(conn) {
                        self.discard(conn).await;
                    }
                }
                Err(e) => {
                    self.release_slot();
                    self.transition(PoolState::Initializing, PoolState::Uninitialized);
                    return Err(e);
                }
            }
        }

        self.transition(PoolState::Initializing, PoolState::Ready);
        self.start_maintenance();
        Ok(())
    }

    /// Check out a connection.
    ///
    /// Waits up to `checkout_timeout` (forever when zero) for capacity and
    /// for a new connection to open.
    pub async fn acquire(&self) -> DbResult<PooledConnection<M>> {
        self.init().await?;
        let started = Instant::now();
        let timeout = self.inner.config.checkout_timeout;
        let deadline = (!timeout.is_zero()).then(|| started + timeout);
        let permit = self.acquire_permit().await?;

        loop {
            self.check_open()?;

            if let Some(entry) = self.take_idle() {
                let mut conn = entry.conn;
                if self.inner.config.test_on_checkout
                    && !self.inner.manager.is_valid(&mut conn).await
                {
                    debug!("Discarding dead connection on checkout");
                    self.discard(conn).await;
                    continue;
                }
                return Ok(PooledConnection::new(self.clone(), conn, permit));
            }

            if self.try_reserve_slot() {
                return match self.connect_with_retry(deadline).await {
                    Ok(conn) => {
                        self.spawn_increment();
                        Ok(PooledConnection::new(self.clone(), conn, permit))
                    }
                    Err(e) => {
                        self.release_slot();
                        Err(e)
                    }
                };
            }

            // Every slot is taken by connections that are still being
            // created; one of them will land in the idle set.
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(DbError::pool_exhausted(timeout.as_millis() as u64));
            }
            let _ = tokio::time::timeout(SLOT_WAIT_INTERVAL, self.inner.idle_notify.notified())
                .await;
        }
    }

    /// Shut the pool down. Calling it again is a no-op.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// when they are returned.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == PoolState::Shutdown {
                debug!("Connection pool already shut down");
                return;
            }
            lifecycle.state = PoolState::Shutdown;
        }

        self.inner.semaphore.close();
        if let Some(handle) = self.inner.maintenance.lock().take() {
            handle.abort();
        }
        self.inner.idle_notify.notify_waiters();

        let idle: Vec<_> = self.inner.idle.lock().drain(..).collect();
        let closed = idle.len();
        for entry in idle {
            self.discard(entry.conn).await;
        }
        info!(closed_connections = closed, "Connection pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.state() == PoolState::Shutdown
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn check_open(&self) -> DbResult<()> {
        let lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            PoolState::Shutdown => Err(DbError::PoolClosed),
            PoolState::Broken => Err(DbError::pool_broken(
                lifecycle
                    .broken_reason
                    .clone()
                    .unwrap_or_else(|| "connection attempts exhausted".to_string()),
            )),
            _ => Ok(()),
        }
    }

    fn transition(&self, from: PoolState, to: PoolState) {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state == from {
            lifecycle.state = to;
        }
    }

    fn mark_broken(&self, reason: String) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.state == PoolState::Shutdown {
                return;
            }
            lifecycle.state = PoolState::Broken;
            lifecycle.broken_reason = Some(reason.clone());
        }
        warn!(reason = %reason, "Connection pool is broken");
        // Wake every waiter; they observe the broken state.
        self.inner.semaphore.close();
        self.inner.idle_notify.notify_waiters();
    }

    async fn acquire_permit(&self) -> DbResult<OwnedSemaphorePermit> {
        let timeout = self.inner.config.checkout_timeout;
        let acquire = Arc::clone(&self.inner.semaphore).acquire_owned();
        let result = if timeout.is_zero() {
            acquire.await
        } else {
            match tokio::time::timeout(timeout, acquire).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(
                        waited_ms = timeout.as_millis() as u64,
                        "Checkout timed out"
                    );
                    return Err(DbError::pool_exhausted(timeout.as_millis() as u64));
                }
            }
        };
        // A closed semaphore means the pool was shut down or broke.
        result.map_err(|_| self.check_open().err().unwrap_or(DbError::PoolClosed))
    }

    /// Reserve one physical connection slot, if below `max_size`.
    fn try_reserve_slot(&self) -> bool {
        let max = self.inner.config.max_size;
        self.inner
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        let _ = self
            .inner
            .slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
    }

    /// Most recently returned connection first.
    fn take_idle(&self) -> Option<IdleConnection<M::Connection>> {
        self.inner.idle.lock().pop_back()
    }

    /// Add a connection to the idle set.
    ///
    /// Hands the connection back when the pool has been shut down.
    fn push_idle(&self, conn: M::Connection) -> Option<M::Connection> {
        self.push_idle_entry(IdleConnection {
            conn,
            idle_since: Instant::now(),
        })
        .map(|entry| entry.conn)
    }

    fn push_idle_entry(
        &self,
        entry: IdleConnection<M::Connection>,
    ) -> Option<IdleConnection<M::Connection>> {
        {
            let mut idle = self.inner.idle.lock();
            if self.inner.lifecycle.lock().state == PoolState::Shutdown {
                return Some(entry);
            }
            idle.push_back(entry);
        }
        self.inner.idle_notify.notify_waiters();
        None
    }

    /// Close a connection and free its slot.
    async fn discard(&self, conn: M::Connection) {
        self.inner.manager.close(conn).await;
        self.release_slot();
    }

    /// Open a connection, retrying per the pool settings.
    ///
    /// With a `deadline`, retrying stops once the next attempt could not start
    /// before it.
    async fn connect_with_retry(&self, deadline: Option<Instant>) -> DbResult<M::Connection> {
        let config = &self.inner.config;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.inner.manager.connect().await {
                Ok(conn) => {
                    debug!(attempt, "Opened new connection");
                    return Ok(conn);
                }
                Err(e) => {
                    if config.acquire_retry_attempts != 0 && attempt >= config.acquire_retry_attempts
                    {
                        warn!(attempts = attempt, error = %e, "Giving up on opening a connection");
                        let message = format!(
                            "Could not open a connection after {} attempt(s): {}",
                            attempt, e
                        );
                        if config.break_after_acquire_failure {
                            self.mark_broken(message.clone());
                            return Err(DbError::pool_broken(message));
                        }
                        return Err(connect_failure(message, &e));
                    }
                    let next_attempt = Instant::now() + config.acquire_retry_delay;
                    if deadline.is_some_and(|deadline| next_attempt >= deadline) {
                        warn!(
                            attempts = attempt,
                            error = %e,
                            "Checkout timeout reached while opening a connection"
                        );
                        let message = format!(
                            "Could not open a connection within the {}ms checkout timeout \
                             after {} attempt(s): {}",
                            config.checkout_timeout.as_millis(),
                            attempt,
                            e
                        );
                        return Err(connect_failure(message, &e));
                    }
                    debug!(attempt, error = %e, "Connection attempt failed, retrying");
                    tokio::time::sleep(config.acquire_retry_delay).await;
                    self.check_open()?;
                }
            }
        }
    }

    /// Grow the idle set by `acquire_increment - 1` connections in the background.
    fn spawn_increment(&self) {
        let extra = self.inner.config.acquire_increment.saturating_sub(1);
        if extra == 0 {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            for _ in 0..extra {
                if pool.check_open().is_err() || !pool.try_reserve_slot() {
                    break;
                }
                match pool.inner.manager.connect().await {
                    Ok(conn) => {
                        if let Some(conn) = pool.push_idle(conn) {
                            pool.discard(conn).await;
                        }
                    }
                    Err(e) => {
                        pool.release_slot();
                        debug!(error = %e, "Failed to open extra connection");
                        break;
                    }
                }
            }
        });
    }

    /// Return a connection to the pool. The permit is released afterwards.
    async fn check_in(&self, mut conn: M::Connection, permit: OwnedSemaphorePermit) {
        if self.check_open().is_err() {
            self.discard(conn).await;
            drop(permit);
            return;
        }

        if self.inner.config.test_on_checkin && !self.inner.manager.is_valid(&mut conn).await {
            debug!("Replacing dead connection on checkin");
            self.discard(conn).await;
            if self.try_reserve_slot() {
                match self.inner.manager.connect().await {
                    Ok(replacement) => {
                        if let Some(replacement) = self.push_idle(replacement) {
                            self.discard(replacement).await;
                        }
                    }
                    Err(e) => {
                        self.release_slot();
                        warn!(error = %e, "Failed to replace dead connection");
                    }
                }
            }
            drop(permit);
            return;
        }

        if let Some(conn) = self.push_idle(conn) {
            self.discard(conn).await;
        }
        drop(permit);
    }

    fn start_maintenance(&self) {
        let Some(interval) = self.inner.config.maintenance_interval() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            Self::maintenance_task(weak, interval).await;
        });
        *self.inner.maintenance.lock() = Some(handle);
    }

    /// Background task that tests and expires idle connections.
    ///
    /// Holds only a `Weak` reference between runs, so it exits when the pool
    /// is dropped.
    async fn maintenance_task(weak: Weak<PoolInner<M>>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(inner) = weak.upgrade() else {
                debug!("Connection pool dropped, maintenance task exiting");
                return;
            };
            let pool = Pool { inner };
            if pool.check_open().is_err() {
                return;
            }
            pool.run_maintenance().await;
        }
    }

    async fn run_maintenance(&self) {
        let config = &self.inner.config;

        if !config.max_idle_time.is_zero() {
            let expired: Vec<_> = {
                let mut idle = self.inner.idle.lock();
                let (expired, kept): (VecDeque<_>, VecDeque<_>) = idle
                    .drain(..)
                    .partition(|entry| entry.idle_since.elapsed() >= config.max_idle_time);
                *idle = kept;
                expired.into_iter().collect()
            };
            if !expired.is_empty() {
                debug!(count = expired.len(), "Closing connections past max idle time");
            }
            for entry in expired {
                self.discard(entry.conn).await;
            }
        }

        if !config.idle_test_period.is_zero() {
            let candidates = self.inner.idle.lock().len();
            for _ in 0..candidates {
                // Testing takes the connection out of the idle set; the
                // permit keeps it counted against max_size like a checkout.
                let Ok(permit) = Arc::clone(&self.inner.semaphore).try_acquire_owned() else {
                    break;
                };
                let Some(mut entry) = self.inner.idle.lock().pop_front() else {
                    break;
                };
                if self.inner.manager.is_valid(&mut entry.conn).await {
                    if let Some(entry) = self.push_idle_entry(entry) {
                        self.discard(entry.conn).await;
                    }
                } else {
                    debug!("Closing idle connection that failed its test");
                    self.discard(entry.conn).await;
                }
                drop(permit);
            }
        }
    }
}

fn connect_failure(message: String, cause: &DbError) -> DbError {
    let suggestion = cause
        .suggestion()
        .unwrap_or("Check that the database server is reachable")
        .to_string();
    DbError::connection(message, suggestion)
}

/// A connection checked out of a [`Pool`].
///
/// Call [`release`](Self::release) when done. Dropping the guard instead
/// returns the connection on a spawned task.
pub struct PooledConnection<M: ManageConnection> {
    pool: Pool<M>,
    conn: Option<M::Connection>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(pool: Pool<M>, conn: M::Connection, permit: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            conn: Some(conn),
            permit: Some(permit),
        }
    }

    /// Return the connection to the pool.
    pub async fn release(mut self) {
        if let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) {
            self.pool.check_in(conn, permit).await;
        }
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection is present until released")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection is present until released")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let (Some(conn), Some(permit)) = (self.conn.take(), self.permit.take()) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    pool.check_in(conn, permit).await;
                    warn!("Connection returned via Drop - consider using explicit release()");
                });
            }
            Err(_) => {
                // No runtime to close it on; the connection is dropped as is.
                drop(conn);
                self.pool.release_slot();
                drop(permit);
            }
        }
    }
}
