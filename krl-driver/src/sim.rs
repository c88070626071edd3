//! Deterministic in-process cluster simulation.
//!
//! Implements the driver seam against a shared, scriptable cluster model so
//! the pool's concurrent lifecycle can be exercised without a real cluster:
//! - Master link switch (`sever_link` / `restore_link`)
//! - Forced return codes for connect, readiness, and handle init
//! - Probabilistic handle-init failures from a seeded PRNG
//! - Injected connect latency for widening race windows
//! - Accounting counters the invariant tests assert against

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::driver::{
    ClusterConnection, ClusterDriver, ClusterHandle, DriverError, ErrorClassification,
};

/// Code returned by `connect` while the simulated link is severed
/// (no contact with the management nodes).
pub const LINK_DOWN_CONNECT_RC: i32 = 1;
/// Code returned by `wait_until_ready` while the simulated link is severed.
pub const LINK_DOWN_READY_RC: i32 = -1;
/// Code returned by `init` when a probabilistic init failure fires.
pub const FLAKY_INIT_RC: i32 = 4000;

/// Shared state of the simulated cluster. One instance backs every
/// connection and handle a [`SimDriver`] produces, so tests observe the
/// whole history of a pool through it.
pub struct SimCluster {
    link_up: AtomicBool,
    forced_connect_rc: AtomicI32,
    forced_ready_rc: AtomicI32,
    forced_init_rc: AtomicI32,
    /// Probability (0-100) that a handle init fails with [`FLAKY_INIT_RC`].
    init_failure_pct: AtomicU32,
    connect_latency_ms: AtomicU64,
    last_error: RwLock<DriverError>,
    connections_opened: AtomicU64,
    connections_destroyed: AtomicU64,
    handles_created: AtomicU64,
    handles_destroyed: AtomicU64,
    handle_inits: AtomicU64,
    seed: AtomicU32,
}

impl SimCluster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            link_up: AtomicBool::new(true),
            forced_connect_rc: AtomicI32::new(0),
            forced_ready_rc: AtomicI32::new(0),
            forced_init_rc: AtomicI32::new(0),
            init_failure_pct: AtomicU32::new(0),
            connect_latency_ms: AtomicU64::new(0),
            last_error: RwLock::new(DriverError::none()),
            connections_opened: AtomicU64::new(0),
            connections_destroyed: AtomicU64::new(0),
            handles_created: AtomicU64::new(0),
            handles_destroyed: AtomicU64::new(0),
            handle_inits: AtomicU64::new(0),
            seed: AtomicU32::new(12345),
        }
    }

    /// Shared handle for use across tasks.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Cut the simulated cluster link. Connect and readiness checks fail
    /// until [`SimCluster::restore_link`] is called.
    pub fn sever_link(&self) {
        warn!("simulated cluster link severed");
        self.link_up.store(false, Ordering::Release);
    }

    /// Bring the simulated cluster link back.
    pub fn restore_link(&self) {
        info!("simulated cluster link restored");
        self.link_up.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::Acquire)
    }

    /// Force every connect attempt to return `rc` (`0` clears).
    pub fn set_connect_rc(&self, rc: i32) {
        self.forced_connect_rc.store(rc, Ordering::Release);
    }

    /// Force every readiness check to return `rc` (`0` clears).
    pub fn set_ready_rc(&self, rc: i32) {
        self.forced_ready_rc.store(rc, Ordering::Release);
    }

    /// Force every handle init to return `rc` (`0` clears).
    pub fn set_init_rc(&self, rc: i32) {
        self.forced_init_rc.store(rc, Ordering::Release);
    }

    /// Make `pct` percent of handle inits fail with [`FLAKY_INIT_RC`].
    pub fn set_init_failure_pct(&self, pct: u32) {
        self.init_failure_pct.store(pct.min(100), Ordering::Release);
    }

    /// Delay every connect attempt by `latency`. Useful for holding a
    /// reconnection cycle open long enough to race other operations
    /// against it.
    pub fn set_connect_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.connect_latency_ms.store(ms, Ordering::Release);
    }

    /// The error the driver reports for a severed cluster link.
    #[must_use]
    pub fn link_loss_error() -> DriverError {
        DriverError::new(4009, ErrorClassification::UnknownResult, "Cluster Failure")
    }

    // -- accounting ---------------------------------------------------------

    #[must_use]
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connections_live(&self) -> u64 {
        self.connections_opened()
            .saturating_sub(self.connections_destroyed.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn handles_created(&self) -> u64 {
        self.handles_created.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn handles_live(&self) -> u64 {
        self.handles_created()
            .saturating_sub(self.handles_destroyed.load(Ordering::Relaxed))
    }

    #[must_use]
    pub fn handle_inits(&self) -> u64 {
        self.handle_inits.load(Ordering::Relaxed)
    }

    // -- internals ----------------------------------------------------------

    fn connect_latency(&self) -> Duration {
        Duration::from_millis(self.connect_latency_ms.load(Ordering::Acquire))
    }

    fn record_error(&self, err: DriverError) {
        let mut guard = match self.last_error.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = err;
    }

    fn current_error(&self) -> DriverError {
        let guard = match self.last_error.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }

    /// Linear congruential step, same constants as libc rand.
    fn next_rand(&self) -> u32 {
        let mut seed = self.seed.load(Ordering::Relaxed);
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
        self.seed.store(seed, Ordering::Relaxed);
        (seed >> 16) & 0x7fff
    }

    fn should_fail_init(&self) -> bool {
        let pct = self.init_failure_pct.load(Ordering::Acquire);
        if pct == 0 {
            return false;
        }
        self.next_rand() % 100 < pct
    }
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Driver-seam entry point over a [`SimCluster`].
#[derive(Clone)]
pub struct SimDriver {
    cluster: Arc<SimCluster>,
}

impl SimDriver {
    #[must_use]
    pub fn new(cluster: Arc<SimCluster>) -> Self {
        Self { cluster }
    }

    /// The cluster model behind this driver.
    #[must_use]
    pub fn cluster(&self) -> &Arc<SimCluster> {
        &self.cluster
    }
}

impl ClusterDriver for SimDriver {
    type Connection = SimConnection;

    fn open(&self, connection_string: &str, node_id: u32) -> SimConnection {
        self.cluster.connections_opened.fetch_add(1, Ordering::Relaxed);
        SimConnection {
            cluster: Arc::clone(&self.cluster),
            connection_string: connection_string.to_string(),
            node_id,
        }
    }
}

/// A simulated long-lived cluster connection.
pub struct SimConnection {
    cluster: Arc<SimCluster>,
    connection_string: String,
    node_id: u32,
}

impl SimConnection {
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    #[must_use]
    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    fn attempt_connect(&self) -> i32 {
        let forced = self.cluster.forced_connect_rc.load(Ordering::Acquire);
        if forced != 0 {
            debug!(rc = forced, "forcing connect failure");
            self.cluster.record_error(DriverError::new(
                forced,
                ErrorClassification::InternalError,
                "simulated connect failure",
            ));
            return forced;
        }
        if !self.cluster.is_link_up() {
            debug!("connect attempt against a severed link");
            self.cluster.record_error(SimCluster::link_loss_error());
            return LINK_DOWN_CONNECT_RC;
        }
        0
    }
}

impl ClusterConnection for SimConnection {
    type Handle = SimHandle;

    async fn connect(&self, retries: u32, retry_delay: Duration) -> i32 {
        let mut attempts_left = retries;
        loop {
            let latency = self.cluster.connect_latency();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let rc = self.attempt_connect();
            if rc == 0 {
                return 0;
            }
            if attempts_left == 0 {
                return rc;
            }
            attempts_left -= 1;
            if !retry_delay.is_zero() {
                tokio::time::sleep(retry_delay).await;
            }
        }
    }

    async fn wait_until_ready(&self, cluster_timeout: Duration, _node_timeout: Duration) -> i32 {
        if !self.cluster.is_link_up() {
            // A real driver blocks the full window before giving up.
            tokio::time::sleep(cluster_timeout).await;
            debug!("readiness wait expired against a severed link");
            self.cluster.record_error(SimCluster::link_loss_error());
            return LINK_DOWN_READY_RC;
        }
        let rc = self.cluster.forced_ready_rc.load(Ordering::Acquire);
        if rc != 0 {
            debug!(rc, "forcing readiness failure");
            self.cluster.record_error(DriverError::new(
                rc,
                ErrorClassification::InternalError,
                "simulated readiness failure",
            ));
            return rc;
        }
        0
    }

    fn latest_error(&self) -> DriverError {
        self.cluster.current_error()
    }

    fn create_handle(&self) -> SimHandle {
        self.cluster.handles_created.fetch_add(1, Ordering::Relaxed);
        SimHandle {
            cluster: Arc::clone(&self.cluster),
            inited: false,
            database: String::new(),
        }
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        self.cluster
            .connections_destroyed
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// A simulated per-request handle.
pub struct SimHandle {
    cluster: Arc<SimCluster>,
    inited: bool,
    database: String,
}

impl SimHandle {
    #[must_use]
    pub fn is_inited(&self) -> bool {
        self.inited
    }

    /// Default database this handle's operations run against.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Point the handle at another default database.
    pub fn set_database(&mut self, name: impl Into<String>) {
        self.database = name.into();
    }
}

impl ClusterHandle for SimHandle {
    fn init(&mut self) -> i32 {
        self.cluster.handle_inits.fetch_add(1, Ordering::Relaxed);
        let forced = self.cluster.forced_init_rc.load(Ordering::Acquire);
        if forced != 0 {
            debug!(rc = forced, "forcing handle init failure");
            return forced;
        }
        if self.cluster.should_fail_init() {
            debug!(rc = FLAKY_INIT_RC, "flaky handle init failure fired");
            return FLAKY_INIT_RC;
        }
        self.inited = true;
        0
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.cluster
            .handles_destroyed
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_succeeds_on_healthy_cluster() {
        let cluster = SimCluster::shared();
        let driver = SimDriver::new(cluster.clone());
        let conn = driver.open("127.0.0.1:1186", 101);

        assert_eq!(conn.connect(0, Duration::ZERO).await, 0);
        assert_eq!(conn.wait_until_ready(Duration::ZERO, Duration::ZERO).await, 0);
        assert_eq!(cluster.connections_opened(), 1);
        assert_eq!(conn.connection_string(), "127.0.0.1:1186");
        assert_eq!(conn.node_id(), 101);
    }

    #[tokio::test]
    async fn test_severed_link_fails_connect_and_records_error() {
        let cluster = SimCluster::shared();
        let driver = SimDriver::new(cluster.clone());
        let conn = driver.open("127.0.0.1:1186", 101);

        cluster.sever_link();
        assert_eq!(conn.connect(2, Duration::ZERO).await, LINK_DOWN_CONNECT_RC);
        let err = conn.latest_error();
        assert_eq!(err.code, 4009);
        assert!(err.classification.indicates_link_loss());

        cluster.restore_link();
        assert_eq!(conn.connect(0, Duration::ZERO).await, 0);
    }

    #[tokio::test]
    async fn test_forced_return_codes() {
        let cluster = SimCluster::shared();
        let driver = SimDriver::new(cluster.clone());
        let conn = driver.open("127.0.0.1:1186", 101);

        cluster.set_connect_rc(-7);
        assert_eq!(conn.connect(0, Duration::ZERO).await, -7);
        cluster.set_connect_rc(0);

        cluster.set_ready_rc(9);
        assert_eq!(conn.wait_until_ready(Duration::ZERO, Duration::ZERO).await, 9);
        assert_eq!(conn.latest_error().code, 9);
        cluster.set_ready_rc(0);

        cluster.set_init_rc(11);
        let mut handle = conn.create_handle();
        assert_eq!(handle.init(), 11);
        assert!(!handle.is_inited());
    }

    #[tokio::test]
    async fn test_handle_accounting_through_drop() {
        let cluster = SimCluster::shared();
        let driver = SimDriver::new(cluster.clone());
        let conn = driver.open("127.0.0.1:1186", 101);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let mut handle = conn.create_handle();
            assert_eq!(handle.init(), 0);
            handles.push(handle);
        }
        assert_eq!(cluster.handles_created(), 4);
        assert_eq!(cluster.handles_live(), 4);

        handles.truncate(1);
        assert_eq!(cluster.handles_live(), 1);
        drop(handles);
        assert_eq!(cluster.handles_live(), 0);
        assert_eq!(cluster.handle_inits(), 4);
    }

    #[test]
    fn test_flaky_init_rate_is_roughly_configured() {
        let cluster = SimCluster::new();
        cluster.set_init_failure_pct(10);

        let mut failures = 0;
        for _ in 0..1000 {
            if cluster.should_fail_init() {
                failures += 1;
            }
        }
        // Seeded LCG, so the band is wide but the count is repeatable
        assert!(failures > 0);
        assert!(failures < 300);
    }
}
