//! Error taxonomy for the cluster access layer.
//!
//! Every variant carries a stable numeric code and an HTTP status so the
//! serving layer above can map failures onto wire responses without
//! inspecting variant internals.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KraalError {
    /// The pool has been terminally shut down; no further operations are
    /// accepted.
    #[error("connection pool is shut down")]
    PoolShutDown,

    /// No live cluster connection. Transient while a reconnection cycle is
    /// running; callers should retry after a short delay.
    #[error("not connected to the cluster")]
    NotConnected,

    /// The driver's connect call returned a non-zero code.
    #[error("cluster connect failed, driver code {rc}")]
    ConnectFailed { rc: i32 },

    /// The cluster did not report ready within the deadline. Carries the
    /// driver's latest error alongside the return code.
    #[error("cluster not ready, driver code {rc}, latest error {driver_code}: {driver_message}")]
    ClusterNotReady {
        rc: i32,
        driver_code: i32,
        driver_message: String,
    },

    /// Per-handle initialization failed. Transient; the caller may retry.
    #[error("handle initialization failed, driver code {rc}")]
    HandleInitFailed { rc: i32 },

    /// A reconnection cycle is already running. Informational; the request
    /// that triggered it changes nothing.
    #[error("a reconnection is already in progress")]
    ReconnectInProgress,

    /// Outstanding handles did not return before the drain deadline.
    /// Shutdown logs this and proceeds with teardown; it is never surfaced
    /// to shutdown callers.
    #[error("drain deadline exceeded with {outstanding} handle(s) still out")]
    DrainTimeout { outstanding: u64 },

    /// Pool configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl KraalError {
    /// Stable numeric code for logs and wire responses.
    #[must_use]
    pub fn error_code(&self) -> u32 {
        match self {
            KraalError::InvalidConfig(_) => 1,
            KraalError::ConnectFailed { .. } => 2,
            KraalError::ClusterNotReady { .. } => 3,
            KraalError::HandleInitFailed { .. } => 4,
            KraalError::NotConnected => 33,
            KraalError::PoolShutDown => 34,
            KraalError::DrainTimeout { .. } => 35,
            KraalError::ReconnectInProgress => 36,
        }
    }

    /// HTTP status the serving layer should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            KraalError::PoolShutDown => 503,
            _ => 500,
        }
    }

    /// Returns true if the operation may succeed when retried later,
    /// e.g. once a reconnection cycle has completed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            // Connection-level failures clear up once the link is back
            KraalError::NotConnected
            | KraalError::ConnectFailed { .. }
            | KraalError::ClusterNotReady { .. } => true,
            // Per-handle init failures are transient driver conditions
            KraalError::HandleInitFailed { .. } => true,
            // The in-flight cycle the caller raced against will finish
            KraalError::ReconnectInProgress => true,
            // Terminal or structural
            KraalError::PoolShutDown
            | KraalError::DrainTimeout { .. }
            | KraalError::InvalidConfig(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, KraalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(KraalError::ConnectFailed { rc: -1 }.error_code(), 2);
        assert_eq!(KraalError::NotConnected.error_code(), 33);
        assert_eq!(KraalError::PoolShutDown.error_code(), 34);
        assert_eq!(KraalError::ReconnectInProgress.error_code(), 36);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(KraalError::PoolShutDown.http_status(), 503);
        assert_eq!(KraalError::NotConnected.http_status(), 500);
        assert_eq!(
            KraalError::HandleInitFailed { rc: 9 }.http_status(),
            500
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(KraalError::NotConnected.is_retryable());
        assert!(KraalError::ReconnectInProgress.is_retryable());
        assert!(KraalError::HandleInitFailed { rc: 1 }.is_retryable());
        assert!(!KraalError::PoolShutDown.is_retryable());
        assert!(!KraalError::InvalidConfig("empty".into()).is_retryable());
    }

    #[test]
    fn test_display_carries_driver_detail() {
        let err = KraalError::ClusterNotReady {
            rc: -1,
            driver_code: 4009,
            driver_message: "Cluster Failure".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4009"));
        assert!(msg.contains("Cluster Failure"));
    }
}
