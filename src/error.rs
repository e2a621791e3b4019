//! Contains the `Error` and `Result` types used throughout this crate.

use std::sync::Arc;

use thiserror::Error;

use crate::host::Host;

/// The result type returned by fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur while monitoring cluster topology or orchestrating a failover.
///
/// The inner [`ErrorKind`] is wrapped in an `Arc` so that `Error` remains cheaply `Clone`,
/// which is required because monitor state is shared across probe tasks.
#[derive(Clone, Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: Arc<ErrorKind>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self {
            kind: Arc::new(kind),
        }
    }

    /// The kind of error that occurred.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// The taxonomy of errors this crate can produce, independent of where they originate.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A property value was malformed or out of range (e.g. a non-integer weight, a weight
    /// `<= 0`, or a malformed `host:weight` pair). Selection fails and the error propagates to
    /// the failover caller.
    #[error("bad configuration: {message}")]
    Configuration { message: String },

    /// A host selector was given an eligible set that was empty after filtering.
    #[error("no eligible host found")]
    NoEligibleHost,

    /// A database session could not be opened to a host.
    #[error("failed to connect to {host}: {message}")]
    Connect { host: Host, message: String },

    /// A handle allocation, execution, bind, or fetch failed on an already-open session.
    #[error("query failed against {host}: {message}")]
    Query { host: Host, message: String },

    /// A failover's deadline expired without a successful, role-compliant reconnection.
    #[error("failover deadline expired")]
    Deadline,

    /// The SQL state presented to the failover service did not warrant failover.
    #[error("sql state {sql_state} does not warrant failover")]
    Skipped { sql_state: String },

    /// A fatal failure constructing a topology monitor (e.g. environment/handle allocation).
    #[error("failed to construct monitor for cluster {cluster_id}: {message}")]
    Construction { cluster_id: String, message: String },
}

impl ErrorKind {
    pub(crate) fn connect(host: Host, message: impl Into<String>) -> Self {
        ErrorKind::Connect {
            host,
            message: message.into(),
        }
    }

    pub(crate) fn query(host: Host, message: impl Into<String>) -> Self {
        ErrorKind::Query {
            host,
            message: message.into(),
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ErrorKind::Configuration {
            message: message.into(),
        }
    }
}
