//! The abstract database session collaborator.
//!
//! This crate never speaks a wire protocol itself; it drives an arbitrary session type through
//! this trait. Production callers implement it over their own ODBC/driver connection; tests
//! implement it over an in-memory [`MockSession`](crate::test_util::MockSession).

use async_trait::async_trait;

use crate::error::Result;

/// A single row of query results, as a sequence of text-rendered columns.
///
/// Real drivers bind typed columns; this crate only ever asks for a handful of
/// well-known columns (see [`crate::dialect::Dialect`]), so a simple string-column cursor is
/// sufficient and keeps the trait decoupled from any particular driver's binding API.
pub type Row = Vec<Option<String>>;

/// An abstract, already-open (or openable) connection to one database node.
#[async_trait]
pub trait DbSession: Send + Sync + 'static {
    /// Opens the session using the given connection string. Connection strings are opaque to
    /// this crate except for the keys documented in [`crate::util::conn_string`].
    async fn connect(&mut self, connection_string: &str) -> Result<()>;

    /// Executes `query` and returns all result rows.
    async fn execute(&mut self, query: &str) -> Result<Vec<Row>>;

    /// A cheap liveness check; used by the monitor to decide whether to attempt a reconnect.
    async fn ping(&mut self) -> bool;

    /// Releases any underlying resources. Idempotent.
    async fn close(&mut self);
}
