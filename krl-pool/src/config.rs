//! Pool configuration.

use std::time::Duration;

use krl_core::{
    KraalError, Result, DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_RETRY_DELAY,
    DEFAULT_DRAIN_POLL_INTERVAL, DEFAULT_DRAIN_TIMEOUT, DEFAULT_NODE_READY_TIMEOUT,
    DEFAULT_READY_TIMEOUT,
};

/// Configuration for a [`crate::ConnectionPool`].
///
/// The connect parameters are handed through to the driver untouched; the
/// drain parameters govern how long a teardown waits for outstanding
/// handles before orphaning them.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Bootstrap address list for the cluster's management nodes,
    /// e.g. `"mgmd-1:1186,mgmd-2:1186"`.
    pub connection_string: String,
    /// Cluster-assigned identifier this client connects as.
    pub node_id: u32,
    /// Extra connect attempts the driver makes on its own.
    pub connect_retries: u32,
    /// Pause between the driver's internal connect attempts.
    pub connect_retry_delay: Duration,
    /// Deadline for the cluster to report ready after connect.
    pub ready_timeout: Duration,
    /// Per-node readiness window within the ready deadline.
    pub node_ready_timeout: Duration,
    /// Pause between drain probes while waiting for outstanding handles.
    pub drain_poll_interval: Duration,
    /// Hard cap on the drain wait; past it, teardown proceeds and handles
    /// still out are orphaned.
    pub drain_timeout: Duration,
}

impl PoolConfig {
    /// Create a configuration with default timings for the given cluster
    /// address list and node id.
    pub fn new(connection_string: impl Into<String>, node_id: u32) -> Self {
        Self {
            connection_string: connection_string.into(),
            node_id,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_delay: DEFAULT_CONNECT_RETRY_DELAY,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            node_ready_timeout: DEFAULT_NODE_READY_TIMEOUT,
            drain_poll_interval: DEFAULT_DRAIN_POLL_INTERVAL,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the driver's internal connect retry count.
    #[must_use]
    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Set the pause between the driver's internal connect attempts.
    #[must_use]
    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    /// Set the cluster readiness deadline.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Set the per-node readiness window.
    #[must_use]
    pub fn with_node_ready_timeout(mut self, timeout: Duration) -> Self {
        self.node_ready_timeout = timeout;
        self
    }

    /// Set the pause between drain probes.
    #[must_use]
    pub fn with_drain_poll_interval(mut self, interval: Duration) -> Self {
        self.drain_poll_interval = interval;
        self
    }

    /// Set the hard cap on the drain wait.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.connection_string.trim().is_empty() {
            return Err(KraalError::InvalidConfig(
                "connection string must not be empty".into(),
            ));
        }
        if self.drain_poll_interval.is_zero() {
            return Err(KraalError::InvalidConfig(
                "drain poll interval must be non-zero".into(),
            ));
        }
        if self.drain_timeout < self.drain_poll_interval {
            return Err(KraalError::InvalidConfig(
                "drain timeout must be at least one poll interval".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = PoolConfig::new("127.0.0.1:1186", 101);

        assert_eq!(config.connect_retries, 5);
        assert_eq!(config.connect_retry_delay, Duration::from_secs(5));
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
        assert_eq!(config.node_ready_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_poll_interval, Duration::from_millis(500));
        assert_eq!(config.drain_timeout, Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::new("mgmd-1:1186,mgmd-2:1186", 7)
            .with_connect_retries(2)
            .with_connect_retry_delay(Duration::from_millis(10))
            .with_drain_poll_interval(Duration::from_millis(25))
            .with_drain_timeout(Duration::from_secs(1));

        assert_eq!(config.connect_retries, 2);
        assert_eq!(config.connect_retry_delay, Duration::from_millis(10));
        assert_eq!(config.drain_poll_interval, Duration::from_millis(25));
        assert_eq!(config.drain_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_empty_connection_string() {
        let config = PoolConfig::new("  ", 101);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_degenerate_drain_timings() {
        let config =
            PoolConfig::new("127.0.0.1:1186", 101).with_drain_poll_interval(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = PoolConfig::new("127.0.0.1:1186", 101)
            .with_drain_poll_interval(Duration::from_secs(2))
            .with_drain_timeout(Duration::from_secs(1));
        assert!(config.validate().is_err());
    }
}
