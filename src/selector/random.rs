use async_trait::async_trait;
use rand::seq::IndexedRandom;

use super::{eligible, no_eligible_host, HostSelector, Properties};
use crate::host::Host;
use crate::Result;

/// Picks uniformly at random from the eligible set.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HostSelector for RandomSelector {
    async fn select(&self, hosts: &[Host], want_writer: bool, _properties: &Properties) -> Result<Host> {
        let candidates = eligible(hosts, want_writer);
        candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(no_eligible_host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host as H;

    #[tokio::test]
    async fn selects_only_eligible_hosts() {
        let hosts = vec![
            H::new("a", 1).with_writer(true),
            H::new("b", 2).with_writer(false),
        ];
        let selector = RandomSelector;
        for _ in 0..20 {
            let picked = selector.select(&hosts, true, &Properties::new()).await.unwrap();
            assert_eq!(picked.host(), "a");
        }
    }

    #[tokio::test]
    async fn fails_when_no_eligible_host() {
        let hosts = vec![H::new("a", 1)];
        let selector = RandomSelector;
        let err = selector.select(&hosts, true, &Properties::new()).await.unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::NoEligibleHost));
    }
}
