//! Host records: immutable identity, mutable availability state, and weight.

use std::fmt;

use time::OffsetDateTime;

/// The default weight assigned to a host absent other information. Lower weights are
/// preferred by the round-robin selector's default-weight fallback.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Availability state of a [`Host`] as last observed by the topology monitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostState {
    Up,
    Down,
}

/// An endpoint descriptor for one node in a cluster (or one router, for the limitless
/// variant). Two hosts are equal iff their `host:port` strings match; `state`, `is_writer`,
/// `weight`, and `last_update_timestamp` are mutable observations layered on that identity
/// and are excluded from equality and hashing.
#[derive(Clone, Debug)]
pub struct Host {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub state: HostState,
    pub is_writer: bool,
    pub weight: u32,
    pub last_update_timestamp: Option<OffsetDateTime>,
}

impl Host {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            state: HostState::Up,
            is_writer: false,
            weight: DEFAULT_WEIGHT,
            last_update_timestamp: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `host:port` identity string used for equality, hashing, and as a cache key.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_up(&self) -> bool {
        self.state == HostState::Up
    }

    pub fn with_writer(mut self, is_writer: bool) -> Self {
        self.is_writer = is_writer;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

/// An ordered sequence of [`Host`]s with at most one writer. Readers appear in query-result
/// order. Replaced atomically; never edited in place by consumers.
pub type Topology = Vec<Host>;

/// The single writer in a topology, if one exists.
pub fn writer_of(topology: &Topology) -> Option<&Host> {
    topology.iter().find(|h| h.is_writer)
}
