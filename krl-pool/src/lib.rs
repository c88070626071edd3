//! # krl-pool
//!
//! A connection-and-handle pool fronting a distributed clustered database.
//!
//! The pool owns one long-lived cluster connection and hands out short-lived
//! per-request handles bound to it. When the cluster link is judged lost, a
//! background worker tears the connection down, waits for outstanding
//! handles to return, and rebuilds it — while acquire keeps failing fast
//! with a retry hint instead of blocking.
//!
//! # Features
//!
//! - **Elastic checkout**: handles are created lazily with no upper bound
//!   and recycled FIFO
//! - **Automatic reconnection**: link loss reported on release triggers a
//!   single-flight background reconnect cycle
//! - **Bounded drain**: shutdown waits for outstanding handles up to a hard
//!   cap, then proceeds and orphans the stragglers
//! - **Stats snapshot**: connection state, lifecycle flags, and handle
//!   counters under one consistent read
//!
//! # Example
//!
//! ```rust,no_run
//! use krl_driver::{SimCluster, SimDriver};
//! use krl_pool::{ConnectionPool, PoolConfig};
//!
//! # async fn run() -> krl_core::Result<()> {
//! let driver = SimDriver::new(SimCluster::shared());
//! let pool = ConnectionPool::new(driver, PoolConfig::new("127.0.0.1:1186", 101))?;
//!
//! pool.connect().await?;
//!
//! let handle = pool.acquire().await?;
//! // ... run one request against the cluster through the handle ...
//! pool.release(handle, None).await;
//!
//! pool.shutdown(true).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod config;
mod pool;
mod stats;

pub use config::PoolConfig;
pub use pool::{ConnectionPool, PooledHandle};
pub use stats::{ConnectionState, PoolStats};
