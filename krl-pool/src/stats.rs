//! Pool statistics surface.

use std::fmt;

/// Whether the pool currently holds a live cluster connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the pool's lifecycle flags and handle counters.
///
/// `handles_available` is refreshed at snapshot time; the other counters
/// are maintained as the pool mutates. A full teardown (terminal shutdown
/// or the teardown half of a reconnect cycle) resets every counter to zero.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub connection_state: ConnectionState,
    /// A background reconnection cycle is running.
    pub reconnection_in_progress: bool,
    /// Terminal shutdown has begun; new acquires are rejected.
    pub shutting_down: bool,
    /// Terminal shutdown has completed; the pool is unusable.
    pub shutdown: bool,
    /// Handles currently free for checkout.
    pub handles_available: u64,
    /// Live handles, checked out or free.
    pub handles_count: u64,
    /// Handles constructed since the last full teardown.
    pub handles_created: u64,
    /// Handles destroyed since the last full teardown. Teardowns destroy
    /// the pool's handles wholesale and reset the counters instead of
    /// counting through here.
    pub handles_deleted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_are_disconnected_and_empty() {
        let stats = PoolStats::default();

        assert_eq!(stats.connection_state, ConnectionState::Disconnected);
        assert!(!stats.reconnection_in_progress);
        assert!(!stats.shutting_down);
        assert!(!stats.shutdown);
        assert_eq!(stats.handles_available, 0);
        assert_eq!(stats.handles_count, 0);
        assert_eq!(stats.handles_created, 0);
        assert_eq!(stats.handles_deleted, 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }
}
