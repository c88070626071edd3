#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod error;

pub use error::{KraalError, Result};

use std::time::Duration;

/// Default number of extra connect attempts the driver makes on its own.
pub const DEFAULT_CONNECT_RETRIES: u32 = 5;
/// Default pause between the driver's internal connect attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Default deadline for the cluster to report itself ready after connect.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default per-node readiness check window within the ready deadline.
pub const DEFAULT_NODE_READY_TIMEOUT: Duration = Duration::from_secs(30);
/// Default pause between probes while waiting for outstanding handles.
pub const DEFAULT_DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Default hard cap on the shutdown drain wait.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(120);
