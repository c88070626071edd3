//! The cluster-driver seam.
//!
//! The pool talks to the native cluster driver exclusively through these
//! traits. The native API is code-based rather than exception-based:
//! operations return raw driver codes (`0` = success) and the connection
//! object retains its latest error for retrieval. That shape is preserved
//! at the seam; conversion into typed errors happens one layer up, in the
//! pool.
//!
//! Async methods are declared as `impl Future + Send` so pool futures that
//! call through the seam can be handed to `tokio::spawn` (the background
//! reconnection worker depends on this).

use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Factory for cluster connections. A production implementation wraps the
/// native driver; [`crate::sim::SimDriver`] is the in-process test double.
pub trait ClusterDriver: Send + Sync + 'static {
    type Connection: ClusterConnection;

    /// Build a connection object bound to the given bootstrap address list
    /// and cluster-assigned client node id. Construction does not touch
    /// the network; [`ClusterConnection::connect`] does.
    fn open(&self, connection_string: &str, node_id: u32) -> Self::Connection;
}

/// One long-lived link from this process to the cluster's management nodes.
pub trait ClusterConnection: Send + Sync + 'static {
    type Handle: ClusterHandle;

    /// Establish the link. The driver performs `retries` additional
    /// attempts on its own, pausing `retry_delay` between them. Returns
    /// `0` on success.
    fn connect(&self, retries: u32, retry_delay: Duration)
        -> impl Future<Output = i32> + Send;

    /// Block until the data nodes report ready, up to `cluster_timeout`
    /// overall and `node_timeout` per node. Returns `0` on success.
    fn wait_until_ready(
        &self,
        cluster_timeout: Duration,
        node_timeout: Duration,
    ) -> impl Future<Output = i32> + Send;

    /// The most recent error recorded on this connection.
    fn latest_error(&self) -> DriverError;

    /// Construct a per-request handle bound to this connection. The handle
    /// is unusable until [`ClusterHandle::init`] succeeds.
    fn create_handle(&self) -> Self::Handle;
}

/// A per-request object bound to a specific cluster connection, used to
/// execute one logical operation at a time. Destruction is `Drop`.
pub trait ClusterHandle: Send + 'static {
    /// Prepare the handle for use. Returns `0` on success.
    fn init(&mut self) -> i32;
}

/// An error as the native driver reports it: a numeric code, a coarse
/// classification, and a human-readable message.
#[derive(Debug, Clone)]
pub struct DriverError {
    pub code: i32,
    pub classification: ErrorClassification,
    pub message: String,
}

impl DriverError {
    #[must_use]
    pub fn new(code: i32, classification: ErrorClassification, message: impl Into<String>) -> Self {
        Self {
            code,
            classification,
            message: message.into(),
        }
    }

    /// The "no error" value connections start out with.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, ErrorClassification::None, "")
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "driver error {} ({}): {}",
            self.code,
            self.classification.as_str(),
            self.message
        )
    }
}

/// Coarse driver-side error classes. The pool only branches on
/// [`ErrorClassification::UnknownResult`]; the rest exist so callers can
/// report outcomes without collapsing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// No error.
    None,
    /// Caller misuse (bad key, bad program).
    Application,
    /// Lookup found nothing.
    NoDataFound,
    /// Uniqueness or FK violation.
    ConstraintViolation,
    /// Table or index mismatch.
    SchemaError,
    /// Resource shortage inside the cluster, retryable.
    TemporaryResourceError,
    /// A data node is recovering.
    NodeRecoveryError,
    /// The cluster shed load.
    OverloadError,
    /// The operation timed out inside the cluster.
    TimeoutExpired,
    /// Outcome indeterminate, most likely loss of the cluster link.
    UnknownResult,
    /// Driver-internal failure.
    InternalError,
}

impl ErrorClassification {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::None => "none",
            ErrorClassification::Application => "application_error",
            ErrorClassification::NoDataFound => "no_data_found",
            ErrorClassification::ConstraintViolation => "constraint_violation",
            ErrorClassification::SchemaError => "schema_error",
            ErrorClassification::TemporaryResourceError => "temporary_resource_error",
            ErrorClassification::NodeRecoveryError => "node_recovery_error",
            ErrorClassification::OverloadError => "overload_error",
            ErrorClassification::TimeoutExpired => "timeout_expired",
            ErrorClassification::UnknownResult => "unknown_result",
            ErrorClassification::InternalError => "internal_error",
        }
    }

    /// True for the class the driver uses to signal that the cluster link
    /// itself is gone. This is what turns a request failure into a
    /// reconnection trigger.
    #[must_use]
    pub fn indicates_link_loss(&self) -> bool {
        matches!(self, ErrorClassification::UnknownResult)
    }
}
