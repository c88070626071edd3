//! Cluster connection and elastic handle pool.
//!
//! One pool owns at most one live cluster connection plus two handle
//! sequences: the FIFO of free handles and the ids of every live handle.
//! Two locks guard it: the core lock (connection, handle sequences, worker
//! descriptor) and the info lock (stats record). Lock order is core before
//! info, never the reverse.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use krl_core::{KraalError, Result};
use krl_driver::{ClusterConnection, ClusterDriver, ClusterHandle, DriverError};

use crate::config::PoolConfig;
use crate::stats::{ConnectionState, PoolStats};

type HandleOf<D> = <<D as ClusterDriver>::Connection as ClusterConnection>::Handle;

/// A driver handle checked out of the pool.
///
/// Exclusively owned by the caller between acquire and release; the pool
/// holds no reference to it while it is out. There is deliberately no
/// Drop-based return: the drain protocol is built on explicit
/// [`ConnectionPool::release`] calls carrying the request outcome, which a
/// destructor cannot.
pub struct PooledHandle<H: ClusterHandle> {
    id: u64,
    handle: H,
}

impl<H: ClusterHandle> PooledHandle<H> {
    fn new(id: u64, handle: H) -> Self {
        Self { id, handle }
    }

    /// Pool-assigned identity of this handle, stable across checkouts.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The underlying driver handle.
    #[must_use]
    pub fn get(&self) -> &H {
        &self.handle
    }

    /// The underlying driver handle, mutably.
    pub fn get_mut(&mut self) -> &mut H {
        &mut self.handle
    }
}

/// Everything the core lock guards.
struct PoolCore<D: ClusterDriver> {
    connection: Option<D::Connection>,
    /// Free handles, FIFO so recently used handles stay warm.
    available: VecDeque<PooledHandle<HandleOf<D>>>,
    /// Ids of every live handle, checked out or free.
    issued: Vec<u64>,
    /// Descriptor of the most recent background reconnect worker.
    reconnect_task: Option<JoinHandle<()>>,
}

impl<D: ClusterDriver> PoolCore<D> {
    fn new() -> Self {
        Self {
            connection: None,
            available: VecDeque::new(),
            issued: Vec::new(),
            reconnect_task: None,
        }
    }
}

struct PoolInner<D: ClusterDriver> {
    driver: D,
    config: PoolConfig,
    /// Core lock. Take before `info` when both are needed.
    core: Mutex<PoolCore<D>>,
    /// Info lock. Never taken before `core`.
    info: Mutex<PoolStats>,
    next_handle_id: AtomicU64,
}

/// A connection-and-handle pool fronting one clustered database.
///
/// Cheap to clone; clones share the same pool. See the crate docs for the
/// lifecycle overview.
pub struct ConnectionPool<D: ClusterDriver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: ClusterDriver> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: ClusterDriver> ConnectionPool<D> {
    /// Create a pool in the disconnected state. No network activity until
    /// [`ConnectionPool::connect`].
    pub fn new(driver: D, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                driver,
                config,
                core: Mutex::new(PoolCore::new()),
                info: Mutex::new(PoolStats::default()),
                next_handle_id: AtomicU64::new(1),
            }),
        })
    }

    /// The configuration this pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Establish the cluster connection and mark the pool connected.
    ///
    /// On any failure the pool stays disconnected with no connection object
    /// behind, so the call can simply be retried.
    ///
    /// # Panics
    ///
    /// Calling this on a pool that is already connected is a programming
    /// error and panics. The serving layer connects once at startup; later
    /// cycles go through the reconnection worker.
    pub async fn connect(&self) -> Result<()> {
        let config = &self.inner.config;
        info!(connection_string = %config.connection_string, node_id = config.node_id, "connecting to cluster");
        {
            let info = self.inner.info.lock().await;
            if info.shutdown || info.shutting_down {
                error!("connect rejected: pool is shut down");
                return Err(KraalError::PoolShutDown);
            }
            assert!(
                info.connection_state != ConnectionState::Connected,
                "connect called on a pool that is already connected"
            );
        }
        {
            let mut core = self.inner.core.lock().await;
            assert!(
                core.connection.is_none(),
                "connection object present while pool is disconnected"
            );
            let connection = self
                .inner
                .driver
                .open(&config.connection_string, config.node_id);
            let rc = connection
                .connect(config.connect_retries, config.connect_retry_delay)
                .await;
            if rc != 0 {
                // Drop the half-built connection so a retry starts clean
                error!(rc, "cluster connect failed");
                return Err(KraalError::ConnectFailed { rc });
            }
            let rc = connection
                .wait_until_ready(config.ready_timeout, config.node_ready_timeout)
                .await;
            if rc != 0 {
                let latest = connection.latest_error();
                error!(rc, driver_error = %latest, "cluster did not become ready");
                return Err(KraalError::ClusterNotReady {
                    rc,
                    driver_code: latest.code,
                    driver_message: latest.message,
                });
            }
            core.connection = Some(connection);
        }
        {
            // State flips outside the core lock to keep its span minimal
            let mut info = self.inner.info.lock().await;
            info.connection_state = ConnectionState::Connected;
        }
        info!("cluster connection established, handle pool ready");
        Ok(())
    }

    /// Check a handle out of the pool.
    ///
    /// Returns a free handle FIFO if one exists, otherwise constructs and
    /// initializes a fresh one bound to the live connection — the pool is
    /// elastic and never queues callers. While the pool is disconnected
    /// this fails fast with [`KraalError::NotConnected`] (arming the
    /// reconnection worker if none is running) rather than blocking.
    pub async fn acquire(&self) -> Result<PooledHandle<HandleOf<D>>> {
        let (rejected, reconnecting, state) = {
            let info = self.inner.info.lock().await;
            (
                info.shutdown || info.shutting_down,
                info.reconnection_in_progress,
                info.connection_state,
            )
        };
        if rejected {
            error!("handle requested after shutdown");
            return Err(KraalError::PoolShutDown);
        }
        if state != ConnectionState::Connected {
            if !reconnecting {
                // A previous cycle ended without restoring the link; re-arm
                debug!("acquire triggered reconnection");
                if let Err(err) = self.reconnect().await {
                    debug!(error = %err, "reconnection already underway");
                }
            }
            warn!(state = %state, reconnecting, "handle requested while not connected");
            return Err(KraalError::NotConnected);
        }

        let mut core = self.inner.core.lock().await;
        if let Some(handle) = core.available.pop_front() {
            return Ok(handle);
        }
        let Some(connection) = core.connection.as_ref() else {
            // A reconnect teardown slipped in after the state snapshot
            warn!("connection torn down between state check and checkout");
            return Err(KraalError::NotConnected);
        };
        let mut handle = connection.create_handle();
        let rc = handle.init();
        if rc != 0 {
            drop(handle);
            error!(rc, "failed to initialize a new driver handle");
            return Err(KraalError::HandleInitFailed { rc });
        }
        let id = self.inner.next_handle_id.fetch_add(1, Ordering::Relaxed);
        core.issued.push(id);
        let mut info = self.inner.info.lock().await;
        info.handles_created += 1;
        info.handles_count += 1;
        debug!(id, total = info.handles_created, "grew handle pool");
        Ok(PooledHandle::new(id, handle))
    }

    /// Return a handle to the pool. Never fails.
    ///
    /// `outcome` is the error the request ended with, if any. When its
    /// classification signals cluster-link loss, a reconnection cycle is
    /// triggered after the handle is back in the pool — the drain protocol
    /// depends on every handle coming home, so the return itself is
    /// unconditional.
    pub async fn release(&self, handle: PooledHandle<HandleOf<D>>, outcome: Option<&DriverError>) {
        {
            let mut core = self.inner.core.lock().await;
            if core.issued.contains(&handle.id) {
                core.available.push_back(handle);
            } else {
                // Teardown orphaned this handle while it was out; it is
                // bound to a connection that no longer exists
                warn!(id = handle.id, "destroying handle returned after pool teardown");
                drop(handle);
            }
        }
        // Core lock released: the trigger below takes it again
        if let Some(err) = outcome {
            if err.classification.indicates_link_loss() {
                error!(driver_error = %err, "request outcome signals cluster link loss, triggering reconnection");
                if let Err(err) = self.reconnect().await {
                    debug!(error = %err, "reconnection already underway");
                }
            }
        }
    }

    /// Snapshot the pool's lifecycle flags and handle counters.
    pub async fn stats(&self) -> PoolStats {
        let core = self.inner.core.lock().await;
        let mut info = self.inner.info.lock().await;
        info.handles_available = core.available.len() as u64;
        info.clone()
    }

    /// Tear the pool down, first waiting (bounded) for outstanding handles.
    ///
    /// With `end = false` this is the teardown half of a reconnect cycle:
    /// the pool is left disconnected but reusable via
    /// [`ConnectionPool::connect`]. With `end = true` the shutdown is
    /// terminal and every later operation is rejected.
    ///
    /// Returns `Ok` even when the drain times out; handles still on loan at
    /// the deadline are orphaned, never destroyed while out.
    pub async fn shutdown(&self, end: bool) -> Result<()> {
        if end {
            // Rejects new acquires immediately; outstanding handles drain
            let mut info = self.inner.info.lock().await;
            info.shutting_down = true;
        }
        if let Err(err) = self.drain().await {
            error!(error = %err, "proceeding with teardown despite unreturned handles");
        }
        info!("shutting down cluster connection and handle pool");
        {
            let mut info = self.inner.info.lock().await;
            info.connection_state = ConnectionState::Disconnected;
        }
        {
            let mut core = self.inner.core.lock().await;
            let mut info = self.inner.info.lock().await;
            let destroyed = core.available.len();
            core.available.clear();
            core.issued.clear();
            info.handles_available = 0;
            info.handles_count = 0;
            info.handles_created = 0;
            info.handles_deleted = 0;
            debug!(destroyed, "destroyed pooled handles");
        }
        {
            let mut core = self.inner.core.lock().await;
            if let Some(connection) = core.connection.take() {
                debug!("destroying cluster connection");
                drop(connection);
            }
        }
        if end {
            let mut core = self.inner.core.lock().await;
            let mut info = self.inner.info.lock().await;
            info.shutdown = true;
            info.shutting_down = false;
            core.reconnect_task = None;
        }
        info!("cluster connection and handle pool shut down");
        Ok(())
    }

    /// Trigger the background reconnection worker.
    ///
    /// Idempotent under concurrent triggers: while a cycle is in flight,
    /// further calls return [`KraalError::ReconnectInProgress`] and change
    /// nothing. Public for testing; normal operation arms this from
    /// [`ConnectionPool::acquire`] and [`ConnectionPool::release`].
    pub async fn reconnect(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        {
            let mut info = self.inner.info.lock().await;
            if info.reconnection_in_progress {
                info!("ignoring reconnection request, one is already in progress");
                return Err(KraalError::ReconnectInProgress);
            }
            info.reconnection_in_progress = true;
        }
        // Drop the descriptor of the previous, finished worker
        core.reconnect_task = None;
        let pool = self.clone();
        core.reconnect_task = Some(tokio::spawn(async move {
            pool.run_reconnect_cycle().await;
        }));
        Ok(())
    }

    /// Body of the background reconnection worker: non-terminal teardown,
    /// then a fresh connect. The in-progress flag is cleared on every exit
    /// path so a failed cycle re-arms the next acquire-side trigger.
    async fn run_reconnect_cycle(&self) {
        info!("reconnection worker started");
        if cfg!(debug_assertions) {
            let info = self.inner.info.lock().await;
            debug_assert!(
                info.reconnection_in_progress,
                "reconnection worker running without the in-progress flag"
            );
        }
        if let Err(err) = self.shutdown(false).await {
            error!(error = %err, "reconnection failed during teardown");
            self.clear_reconnect_flag().await;
            return;
        }
        if let Err(err) = self.connect().await {
            error!(error = %err, "reconnection failed during connect");
            self.clear_reconnect_flag().await;
            return;
        }
        self.clear_reconnect_flag().await;
        info!("reconnection complete, cluster connection restored");
    }

    async fn clear_reconnect_flag(&self) {
        let mut info = self.inner.info.lock().await;
        info.reconnection_in_progress = false;
    }

    /// Wait for every outstanding handle to return, probing under the core
    /// lock and sleeping between probes, up to the configured cap.
    async fn drain(&self) -> Result<()> {
        let deadline = Instant::now() + self.inner.config.drain_timeout;
        loop {
            let (available, created) = {
                let core = self.inner.core.lock().await;
                let info = self.inner.info.lock().await;
                (core.available.len() as u64, info.handles_created)
            };
            if available == created {
                info!(total = created, "all outstanding handles accounted for");
                return Ok(());
            }
            if Instant::now() >= deadline {
                let outstanding = created.saturating_sub(available);
                error!(outstanding, "timed out waiting for outstanding handles");
                return Err(KraalError::DrainTimeout { outstanding });
            }
            warn!(
                expected = created,
                available, "waiting for outstanding handles to return"
            );
            tokio::time::sleep(self.inner.config.drain_poll_interval).await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use krl_driver::{SimCluster, SimDriver};
    use std::time::Duration;

    fn fast_config() -> PoolConfig {
        PoolConfig::new("127.0.0.1:1186", 101)
            .with_connect_retries(0)
            .with_connect_retry_delay(Duration::ZERO)
            .with_ready_timeout(Duration::from_millis(50))
            .with_node_ready_timeout(Duration::from_millis(50))
            .with_drain_poll_interval(Duration::from_millis(20))
            .with_drain_timeout(Duration::from_secs(2))
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let driver = SimDriver::new(SimCluster::shared());
        let result = ConnectionPool::new(driver, PoolConfig::new("", 101));
        assert!(matches!(result, Err(KraalError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_acquire_before_connect_fails_fast() {
        let driver = SimDriver::new(SimCluster::shared());
        let pool = ConnectionPool::new(driver, fast_config()).unwrap();

        let result = pool.acquire().await;
        assert!(matches!(result, Err(KraalError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_pool_retryable() {
        let cluster = SimCluster::shared();
        let pool = ConnectionPool::new(SimDriver::new(cluster.clone()), fast_config()).unwrap();

        cluster.set_connect_rc(-7);
        let result = pool.connect().await;
        assert!(matches!(result, Err(KraalError::ConnectFailed { rc: -7 })));
        // The failed connection object is gone, not lingering half-built
        assert_eq!(cluster.connections_live(), 0);

        cluster.set_connect_rc(0);
        pool.connect().await.unwrap();
        let stats = pool.stats().await;
        assert_eq!(stats.connection_state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_ready_failure_carries_driver_error() {
        let cluster = SimCluster::shared();
        let pool = ConnectionPool::new(SimDriver::new(cluster.clone()), fast_config()).unwrap();

        cluster.set_ready_rc(9);
        match pool.connect().await {
            Err(KraalError::ClusterNotReady {
                rc, driver_code, ..
            }) => {
                assert_eq!(rc, 9);
                assert_eq!(driver_code, 9);
            }
            other => panic!("expected ClusterNotReady, got {other:?}"),
        }
        assert_eq!(cluster.connections_live(), 0);
    }

    #[tokio::test]
    async fn test_handle_init_failure_destroys_the_partial_handle() {
        let cluster = SimCluster::shared();
        let pool = ConnectionPool::new(SimDriver::new(cluster.clone()), fast_config()).unwrap();
        pool.connect().await.unwrap();

        cluster.set_init_rc(13);
        let result = pool.acquire().await;
        assert!(matches!(result, Err(KraalError::HandleInitFailed { rc: 13 })));

        // Counters untouched, partial handle destroyed
        let stats = pool.stats().await;
        assert_eq!(stats.handles_created, 0);
        assert_eq!(stats.handles_count, 0);
        assert_eq!(cluster.handles_live(), 0);

        cluster.set_init_rc(0);
        let handle = pool.acquire().await.unwrap();
        assert!(handle.get().is_inited());
        pool.release(handle, None).await;
    }

    #[tokio::test]
    async fn test_handle_mutation_survives_checkout() {
        let cluster = SimCluster::shared();
        let pool = ConnectionPool::new(SimDriver::new(cluster.clone()), fast_config()).unwrap();
        pool.connect().await.unwrap();

        let mut handle = pool.acquire().await.unwrap();
        assert_eq!(handle.get().database(), "");
        handle.get_mut().set_database("inventory");
        assert_eq!(handle.get().database(), "inventory");
        let id = handle.id();
        pool.release(handle, None).await;

        // The recycled handle comes back with its driver-side state intact
        let handle = pool.acquire().await.unwrap();
        assert_eq!(handle.id(), id);
        assert_eq!(handle.get().database(), "inventory");
        pool.release(handle, None).await;
    }
}
