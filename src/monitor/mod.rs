//! The core per-cluster background supervisor: a main worker alternating between `Regular` and
//! `Panic` modes, backed by a dynamic pool of per-node probe workers spawned only while in
//! `Panic` mode.
//!
//! Probes never hold a pointer back to their monitor. Each owns a clone of exactly the shared
//! handles it needs — the topology cache, the query helper, and the [`shared::SharedState`]
//! flags/notifies used to report a claimed writer session or a freshly observed topology — so
//! ownership stays one-way, probe to monitor, with no cycle for a destructor to untangle.

mod core;
mod factory;
mod probe;
mod shared;

pub use core::{ClusterTopologyMonitor, MonitorConfig};
pub use factory::SessionFactory;
pub use shared::Mode;
