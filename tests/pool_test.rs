//! Integration tests for the connection pool.
//!
//! Tests verify that:
//! - Checkouts never exceed max_size and time out when the pool is exhausted
//! - Connect failures are retried, and optionally break the pool
//! - Dead connections are discarded on checkout and replaced on checkin
//! - Idle connections expire and are tested by the maintenance task
//! - Shutdown is idempotent and closes everything it owns

use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use table_gateway::db::{ManageConnection, Pool, PoolConfig, PoolState};
use table_gateway::error::{DbError, DbResult};
use tokio_test::assert_ok;

#[derive(Default)]
struct MockState {
    connect_calls: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    /// Fail this many connect attempts before succeeding.
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    unhealthy: AtomicBool,
}

struct MockManager(Arc<MockState>);

#[async_trait]
impl ManageConnection for MockManager {
    type Connection = usize;

    async fn connect(&self) -> DbResult<usize> {
        self.0.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.0.fail_always.load(Ordering::SeqCst) {
            return Err(DbError::connection("connection refused", "Start the server"));
        }
        let failing = self
            .0
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::connection("connection refused", "Start the server"));
        }
        Ok(self.0.opened.fetch_add(1, Ordering::SeqCst))
    }

    async fn is_valid(&self, _conn: &mut usize) -> bool {
        !self.0.unhealthy.load(Ordering::SeqCst)
    }

    async fn close(&self, _conn: usize) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

fn base_config(max_size: u32) -> PoolConfig {
    PoolConfig {
        initial_size: 0,
        max_size,
        acquire_increment: 1,
        acquire_retry_attempts: 1,
        acquire_retry_delay: Duration::from_millis(1),
        checkout_timeout: Duration::from_millis(100),
        ..PoolConfig::default()
    }
}

fn create_pool(config: PoolConfig) -> (Pool<MockManager>, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let pool = Pool::new(MockManager(Arc::clone(&state)), config).unwrap();
    (pool, state)
}

#[tokio::test]
async fn test_concurrent_acquires_bounded_by_max_size() {
    let (pool, state) = create_pool(base_config(3));

    let results = join_all((0..5).map(|_| pool.acquire())).await;
    let (held, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);

    assert_eq!(held.len(), 3);
    assert_eq!(failed.len(), 2);
    for result in &failed {
        assert!(matches!(result, Err(DbError::PoolExhausted { waited_ms: 100 })));
    }
    assert_eq!(pool.status().in_use, 3);
    assert!(pool.status().is_at_capacity());
    assert_eq!(state.opened.load(Ordering::SeqCst), 3);

    for conn in held.into_iter().flatten() {
        conn.release().await;
    }
    assert_eq!(pool.status().idle, 3);
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_blocked_acquire_resumes_after_release() {
    let mut config = base_config(1);
    config.checkout_timeout = Duration::ZERO;
    let (pool, state) = create_pool(config);

    let first = assert_ok!(pool.acquire().await);
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|c| *c) })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    first.release().await;
    let id = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should be woken")
        .unwrap();
    assert_eq!(assert_ok!(id), 0);
    assert_eq!(state.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_lazy_initialization_runs_once() {
    let mut config = base_config(5);
    config.initial_size = 3;
    let (pool, state) = create_pool(config);

    assert_eq!(pool.state(), PoolState::Uninitialized);
    let results = join_all((0..4).map(|_| pool.init())).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(pool.state(), PoolState::Ready);
    assert_eq!(state.opened.load(Ordering::SeqCst), 3);
    assert_eq!(pool.status().idle, 3);
}

#[tokio::test]
async fn test_acquire_increment_fills_idle_set() {
    let mut config = base_config(4);
    config.acquire_increment = 3;
    let (pool, state) = create_pool(config);

    let conn = assert_ok!(pool.acquire().await);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let status = pool.status();
    assert_eq!(status.total, 3);
    assert_eq!(status.idle, 2);
    assert_eq!(state.opened.load(Ordering::SeqCst), 3);
    conn.release().await;
}

#[tokio::test]
async fn test_connect_retried_until_success() {
    let mut config = base_config(2);
    config.acquire_retry_attempts = 3;
    let (pool, state) = create_pool(config);
    state.fail_next.store(2, Ordering::SeqCst);

    let conn = assert_ok!(pool.acquire().await);
    assert_eq!(state.connect_calls.load(Ordering::SeqCst), 3);
    conn.release().await;
}

#[tokio::test]
async fn test_exhausted_retries_leave_pool_usable() {
    let mut config = base_config(2);
    config.acquire_retry_attempts = 2;
    let (pool, state) = create_pool(config);
    state.fail_always.store(true, Ordering::SeqCst);

    let err = pool.acquire().await.err().unwrap();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(err.is_retryable());
    assert_eq!(state.connect_calls.load(Ordering::SeqCst), 2);
    assert_eq!(pool.state(), PoolState::Ready);
    assert_eq!(pool.status().total, 0);

    state.fail_always.store(false, Ordering::SeqCst);
    let conn = assert_ok!(pool.acquire().await);
    conn.release().await;
}

#[tokio::test]
async fn test_break_after_acquire_failure() {
    let mut config = base_config(2);
    config.acquire_retry_attempts = 2;
    config.break_after_acquire_failure = true;
    let (pool, state) = create_pool(config);
    state.fail_always.store(true, Ordering::SeqCst);

    let err = pool.acquire().await.err().unwrap();
    assert!(matches!(err, DbError::PoolBroken { .. }));
    assert_eq!(pool.state(), PoolState::Broken);

    // Broken for good, even once the server is back
    state.fail_always.store(false, Ordering::SeqCst);
    let err = pool.acquire().await.err().unwrap();
    assert!(matches!(err, DbError::PoolBroken { .. }));
    assert!(!err.is_retryable());
}

/// Test that retrying forever still honors the checkout timeout.
#[tokio::test]
async fn test_unlimited_retries_bounded_by_checkout_timeout() {
    let mut config = base_config(2);
    config.acquire_retry_attempts = 0;
    config.acquire_retry_delay = Duration::from_millis(10);
    config.checkout_timeout = Duration::from_millis(100);
    let (pool, state) = create_pool(config);
    state.fail_always.store(true, Ordering::SeqCst);

    let result = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
        .await
        .expect("checkout should give up once its timeout is spent");
    let err = result.err().unwrap();
    assert!(matches!(err, DbError::Connection { .. }));
    assert!(state.connect_calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(pool.state(), PoolState::Ready);
    assert_eq!(pool.status().total, 0);

    state.fail_always.store(false, Ordering::SeqCst);
    let conn = assert_ok!(pool.acquire().await);
    conn.release().await;
}

#[tokio::test]
async fn test_test_on_checkout_discards_dead_connection() {
    let mut config = base_config(2);
    config.initial_size = 1;
    config.test_on_checkout = true;
    let (pool, state) = create_pool(config);
    assert_ok!(pool.init().await);
    state.unhealthy.store(true, Ordering::SeqCst);

    let conn = assert_ok!(pool.acquire().await);
    assert_eq!(*conn, 1);
    assert_eq!(state.closed.load(Ordering::SeqCst), 1);
    conn.release().await;
    assert_eq!(pool.status().total, 1);
}

#[tokio::test]
async fn test_test_on_checkin_replaces_dead_connection() {
    let mut config = base_config(2);
    config.test_on_checkin = true;
    let (pool, state) = create_pool(config);

    let conn = assert_ok!(pool.acquire().await);
    state.unhealthy.store(true, Ordering::SeqCst);
    conn.release().await;

    assert_eq!(state.closed.load(Ordering::SeqCst), 1);
    assert_eq!(state.opened.load(Ordering::SeqCst), 2);
    let status = pool.status();
    assert_eq!(status.idle, 1);
    assert_eq!(status.total, 1);
}

#[tokio::test]
async fn test_dropped_connection_is_returned() {
    let (pool, _state) = create_pool(base_config(1));

    let conn = assert_ok!(pool.acquire().await);
    drop(conn);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pool.status().idle, 1);
    let conn = assert_ok!(pool.acquire().await);
    conn.release().await;
}

#[tokio::test]
async fn test_idle_connections_expire() {
    let mut config = base_config(3);
    config.initial_size = 2;
    config.max_idle_time = Duration::from_millis(50);
    let (pool, state) = create_pool(config);
    assert_ok!(pool.init().await);
    assert_eq!(pool.status().idle, 2);

    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(pool.status().total, 0);
    assert_eq!(state.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_idle_test_period_closes_dead_connections() {
    let mut config = base_config(3);
    config.initial_size = 2;
    config.idle_test_period = Duration::from_millis(30);
    let (pool, state) = create_pool(config);
    assert_ok!(pool.init().await);
    state.unhealthy.store(true, Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.status().total, 0);
    assert_eq!(state.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let mut config = base_config(3);
    config.initial_size = 2;
    let (pool, state) = create_pool(config);
    assert_ok!(pool.init().await);

    pool.shutdown().await;
    pool.shutdown().await;

    assert_eq!(pool.state(), PoolState::Shutdown);
    assert_eq!(state.closed.load(Ordering::SeqCst), 2);
    assert!(matches!(pool.acquire().await, Err(DbError::PoolClosed)));
}

#[tokio::test]
async fn test_connection_returned_after_shutdown_is_closed() {
    let (pool, state) = create_pool(base_config(2));

    let conn = assert_ok!(pool.acquire().await);
    pool.shutdown().await;
    conn.release().await;

    assert_eq!(state.closed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_shutdown_wakes_waiters() {
    let mut config = base_config(1);
    config.checkout_timeout = Duration::ZERO;
    let (pool, _state) = create_pool(config);

    let held = assert_ok!(pool.acquire().await);
    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await.map(|c| *c) })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.shutdown().await;
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should be woken")
        .unwrap();
    assert!(matches!(result, Err(DbError::PoolClosed)));
    held.release().await;
}

#[test]
fn test_invalid_config_rejected() {
    let state = Arc::new(MockState::default());
    let config = PoolConfig {
        initial_size: 5,
        max_size: 2,
        ..PoolConfig::default()
    };
    let err = Pool::new(MockManager(state), config).err().unwrap();
    assert!(matches!(err, DbError::Configuration { .. }));
}
