//! Host selection strategies: random, round-robin-with-weights, and highest-weight.
//!
//! All three share one contract: filter to the eligible set (`state == UP` and, if a writer
//! was requested, `is_writer`), then pick one eligible host or fail with
//! [`ErrorKind::NoEligibleHost`].

mod highest_weight;
mod random;
mod round_robin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

pub use highest_weight::HighestWeightSelector;
pub use random::RandomSelector;
pub use round_robin::{set_round_robin_weight, RoundRobinSelector};

use crate::error::{Error, ErrorKind};
use crate::host::Host;
use crate::Result;

/// Caller-supplied configuration for a selection call, e.g. `round_robin_host_weight_pairs`.
pub type Properties = HashMap<String, String>;

/// A pluggable strategy for choosing one host from a topology.
#[async_trait]
pub trait HostSelector: Send + Sync {
    async fn select(&self, hosts: &[Host], want_writer: bool, properties: &Properties) -> Result<Host>;
}

/// Applies the shared eligibility filter: `state == UP` and, if `want_writer`, `is_writer`.
fn eligible(hosts: &[Host], want_writer: bool) -> Vec<Host> {
    hosts
        .iter()
        .filter(|h| h.is_up() && (!want_writer || h.is_writer))
        .cloned()
        .collect()
}

fn no_eligible_host() -> Error {
    Error::new(ErrorKind::NoEligibleHost)
}

/// The `READERHOSTSELECTORSTRATEGY` connection-string values (spec §6); defaults to `Random`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SelectorStrategy {
    #[default]
    Random,
    RoundRobin,
    HighestWeight,
}

impl SelectorStrategy {
    /// Parses the `READERHOSTSELECTORSTRATEGY` value case-insensitively.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "RANDOM" => Ok(Self::Random),
            "ROUND_ROBIN" => Ok(Self::RoundRobin),
            "HIGHEST_WEIGHT" => Ok(Self::HighestWeight),
            other => Err(Error::new(ErrorKind::configuration(format!(
                "unknown reader host selector strategy {other:?}"
            )))),
        }
    }

    /// Builds the concrete selector this strategy names. `RoundRobin` carries per-cluster
    /// stickiness state, so each call to this method returns a fresh, independent selector —
    /// callers that want shared stickiness across calls should build once and reuse the
    /// `Arc<dyn HostSelector>`.
    pub fn build(self) -> Arc<dyn HostSelector> {
        match self {
            Self::Random => Arc::new(RandomSelector),
            Self::RoundRobin => Arc::new(RoundRobinSelector::new()),
            Self::HighestWeight => Arc::new(HighestWeightSelector),
        }
    }
}
