#![doc = include_str!("../README.md")]
#![warn(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

//! Client-side high-availability layer for a clustered relational database: continuous
//! topology discovery, communication-failure detection with policy-constrained reconnection,
//! and weighted discovery of a sharded "limitless" cluster's stateless router endpoints.
//!
//! The pieces a caller typically touches:
//!
//! - [`registry::global`] / [`ClusterFailoverOptions`] to start a per-cluster failover service
//!   and drive reconnection via [`registry::ClusterServiceRegistry::failover_connection`].
//! - [`limitless::global`] for the sharded-cluster router variant.
//! - [`DbSession`] and [`dialect::Dialect`], the two collaborator traits a caller must supply;
//!   everything else in this crate is self-contained.

pub mod auth;
pub mod cache;
pub mod dialect;
pub mod error;
pub mod failover;
pub mod host;
pub mod limitless;
pub mod monitor;
pub mod options;
pub mod registry;
pub mod selector;
pub mod session;
#[cfg(any(test, feature = "test-util"))]
pub mod test_util;
pub mod topology;
pub mod util;

pub use error::{Error, ErrorKind, Result};
pub use host::{Host, HostState, Topology};
pub use options::ClusterFailoverOptions;
pub use session::DbSession;
