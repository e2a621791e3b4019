//! In-memory [`DbSession`] used by this crate's own tests and available to downstream
//! integration tests that want to drive the monitor/failover state machines without a live
//! database.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::{Error, ErrorKind};
use crate::host::Host;
use crate::session::{DbSession, Row};
use crate::Result;

/// A scriptable, in-memory stand-in for a real database session.
///
/// Each call to `execute` consumes the next scripted response (either a row set or a forced
/// failure); once the script is exhausted, `execute` returns an empty result rather than
/// panicking, so tests that don't care about a particular query can leave it unscripted.
#[derive(Default)]
pub struct MockSession {
    connected: bool,
    connect_should_fail: bool,
    responses: VecDeque<ScriptedResponse>,
    pub connect_history: Vec<String>,
    pub execute_history: Vec<String>,
}

enum ScriptedResponse {
    Rows(Vec<Row>),
    Failure,
}

/// Builds a connect-failure [`Error`], for hand-rolled [`DbSession`] test doubles that want the
/// same `ErrorKind::Connect` a failed [`MockSession::connect`] produces but can't name
/// `ErrorKind::connect` directly (it's `pub(crate)`, and `ErrorKind` is `#[non_exhaustive]`).
pub fn connect_failure(host: impl Into<String>, message: impl Into<String>) -> Error {
    Error::new(ErrorKind::connect(Host::new(host, 0), message))
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a successful response for the next `execute` call.
    pub fn push_rows(&mut self, rows: Vec<Row>) {
        self.responses.push_back(ScriptedResponse::Rows(rows));
    }

    /// Scripts a failure for the next `execute` call.
    pub fn fail_next_execute(&mut self) {
        self.responses.push_back(ScriptedResponse::Failure);
    }

    /// Makes the next `connect` call fail.
    pub fn fail_next_connect(&mut self) {
        self.connect_should_fail = true;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

#[async_trait]
impl DbSession for MockSession {
    async fn connect(&mut self, connection_string: &str) -> Result<()> {
        self.connect_history.push(connection_string.to_string());
        if self.connect_should_fail {
            self.connect_should_fail = false;
            return Err(Error::new(ErrorKind::connect(
                Host::new("mock", 0),
                "scripted connect failure",
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn execute(&mut self, query: &str) -> Result<Vec<Row>> {
        self.execute_history.push(query.to_string());
        match self.responses.pop_front() {
            Some(ScriptedResponse::Rows(rows)) => Ok(rows),
            Some(ScriptedResponse::Failure) => Err(Error::new(ErrorKind::query(
                Host::new("mock", 0),
                "scripted query failure",
            ))),
            None => Ok(Vec::new()),
        }
    }

    async fn ping(&mut self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        self.connected = false;
    }
}
