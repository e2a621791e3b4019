use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{eligible, no_eligible_host, HostSelector, Properties};
use crate::cache::TtlCache;
use crate::error::{Error, ErrorKind};
use crate::host::Host;
use crate::Result;

/// Property key carrying a fallback weight for hosts absent from `ROUND_ROBIN_HOST_WEIGHT_KEY`.
pub const ROUND_ROBIN_DEFAULT_WEIGHT_KEY: &str = "round_robin_default_weight";
/// Property key carrying `"host:weight,host:weight,..."` pairs.
pub const ROUND_ROBIN_HOST_WEIGHT_KEY: &str = "round_robin_host_weight_pairs";

const NO_HOST_IDX: usize = usize::MAX;

/// Per-cluster round-robin selector state. All hosts in a cluster share one instance (it is
/// written back under every eligible host's cache key) so that selecting via any sorted-order
/// member of the cluster observes the same stickiness counter.
#[derive(Debug, Default)]
struct RoundRobinClusterInfo {
    last_host: Option<String>,
    cluster_weight_map: HashMap<String, u32>,
    default_weight: u32,
    weight_counter: u32,
    last_default_weight_str: Option<String>,
    last_host_weight_str: Option<String>,
}

impl RoundRobinClusterInfo {
    fn new() -> Self {
        Self {
            default_weight: crate::host::DEFAULT_WEIGHT,
            ..Default::default()
        }
    }
}

/// Sorts the eligible set lexicographically, sticks to `last_host` for `weight_counter` more
/// selections, then advances to the next host in sorted order, consuming its configured (or
/// default) weight as the new stickiness counter.
#[derive(Clone)]
pub struct RoundRobinSelector {
    cache: Arc<TtlCache<String, Arc<Mutex<RoundRobinClusterInfo>>>>,
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(TtlCache::new()),
        }
    }
}

#[async_trait]
impl HostSelector for RoundRobinSelector {
    async fn select(&self, hosts: &[Host], want_writer: bool, properties: &Properties) -> Result<Host> {
        let mut candidates = eligible(hosts, want_writer);
        if candidates.is_empty() {
            return Err(no_eligible_host());
        }
        candidates.sort_by(|a, b| a.host().cmp(b.host()));

        let cache_key = candidates[0].host().to_string();
        let info_handle = match self.cache.get(&cache_key).await {
            Some(existing) => existing,
            None => Arc::new(Mutex::new(RoundRobinClusterInfo::new())),
        };

        let target_idx = {
            let mut info = info_handle.lock().await;
            reconcile_properties(&mut info, properties)?;

            let last_idx = info
                .last_host
                .as_deref()
                .and_then(|last| candidates.iter().position(|h| h.host() == last))
                .unwrap_or(NO_HOST_IDX);

            let target_idx = if info.weight_counter > 0 && last_idx != NO_HOST_IDX {
                last_idx
            } else {
                let target_idx = if last_idx != NO_HOST_IDX && last_idx != candidates.len() - 1 {
                    last_idx + 1
                } else {
                    0
                };
                let weight = info
                    .cluster_weight_map
                    .get(candidates[target_idx].host())
                    .copied()
                    .unwrap_or(info.default_weight);
                info.weight_counter = weight;
                target_idx
            };

            info.weight_counter = info.weight_counter.saturating_sub(1);
            info.last_host = Some(candidates[target_idx].host().to_string());
            target_idx
        };

        for host in &candidates {
            self.cache
                .put(host.host().to_string(), info_handle.clone())
                .await;
        }

        Ok(candidates[target_idx].clone())
    }
}

fn reconcile_properties(info: &mut RoundRobinClusterInfo, properties: &Properties) -> Result<()> {
    if let Some(value) = properties.get(ROUND_ROBIN_DEFAULT_WEIGHT_KEY) {
        if info.last_default_weight_str.as_deref() != Some(value.as_str()) {
            info.default_weight = parse_positive_int(value, "default host weight")?;
            info.last_default_weight_str = Some(value.clone());
        }
    }

    if let Some(value) = properties.get(ROUND_ROBIN_HOST_WEIGHT_KEY) {
        if info.last_host_weight_str.as_deref() != Some(value.as_str()) {
            info.last_host = None;
            info.weight_counter = 0;
            info.cluster_weight_map = parse_host_weight_pairs(value)?;
            info.last_host_weight_str = Some(value.clone());
        }
    }

    Ok(())
}

fn parse_positive_int(value: &str, what: &str) -> Result<u32> {
    let parsed: u32 = value
        .parse()
        .map_err(|_| Error::new(ErrorKind::configuration(format!("{what} is not a positive integer: {value:?}"))))?;
    if parsed == 0 {
        return Err(Error::new(ErrorKind::configuration(format!("{what} must be >= 1, got 0"))));
    }
    Ok(parsed)
}

fn parse_host_weight_pairs(value: &str) -> Result<HashMap<String, u32>> {
    if value.is_empty() {
        return Ok(HashMap::new());
    }
    let mut map = HashMap::new();
    for pair in value.split(',') {
        let mut parts = pair.splitn(2, ':');
        let name = parts.next().unwrap_or("");
        let weight = parts.next();
        let weight = match weight {
            Some(w) => w,
            None => {
                return Err(Error::new(ErrorKind::configuration(format!(
                    "malformed host:weight pair {pair:?}"
                ))))
            }
        };
        if name.is_empty() || weight.is_empty() {
            return Err(Error::new(ErrorKind::configuration(format!(
                "empty host name or weight in pair {pair:?}"
            ))));
        }
        let weight = parse_positive_int(weight, "host weight")?;
        map.insert(name.to_string(), weight);
    }
    Ok(map)
}

/// Writes `properties[ROUND_ROBIN_HOST_WEIGHT_KEY] = "h1:w1,h2:w2,..."` from each host's own
/// `weight` field, for callers that want the round-robin selector to honor topology-derived
/// weights rather than caller-supplied ones.
pub fn set_round_robin_weight(hosts: &[Host], properties: &mut Properties) {
    let pairs: Vec<String> = hosts
        .iter()
        .map(|h| format!("{}:{}", h.host(), h.weight))
        .collect();
    properties.insert(ROUND_ROBIN_HOST_WEIGHT_KEY.to_string(), pairs.join(","));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host as H;

    fn hosts(names: &[&str]) -> Vec<H> {
        names.iter().map(|n| H::new(*n, 1).with_writer(true)).collect()
    }

    #[tokio::test]
    async fn cycles_through_sorted_hosts_with_uniform_weight() {
        let selector = RoundRobinSelector::new();
        let hs = hosts(&["b", "a", "c"]);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let picked = selector.select(&hs, true, &Properties::new()).await.unwrap();
            seen.push(picked.host().to_string());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn weighted_pattern_a2_b1() {
        let selector = RoundRobinSelector::new();
        let hs = hosts(&["a", "b"]);
        let mut props = Properties::new();
        props.insert(ROUND_ROBIN_HOST_WEIGHT_KEY.to_string(), "a:2,b:1".to_string());

        let mut seen = Vec::new();
        for _ in 0..6 {
            let picked = selector.select(&hs, true, &props).await.unwrap();
            seen.push(picked.host().to_string());
        }
        assert_eq!(
            seen,
            vec!["a", "a", "b", "a", "a", "b"]
        );
    }

    #[tokio::test]
    async fn reconfiguring_host_weights_resets_stickiness() {
        let selector = RoundRobinSelector::new();
        let hs = hosts(&["a", "b"]);
        let mut props = Properties::new();
        props.insert(ROUND_ROBIN_HOST_WEIGHT_KEY.to_string(), "a:2,b:1".to_string());

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(selector.select(&hs, true, &props).await.unwrap().host().to_string());
        }
        assert_eq!(seen, vec!["a", "a", "b"]);

        props.insert(ROUND_ROBIN_HOST_WEIGHT_KEY.to_string(), "a:1,b:2".to_string());
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(selector.select(&hs, true, &props).await.unwrap().host().to_string());
        }
        assert_eq!(seen, vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn bad_configuration_is_rejected() {
        let selector = RoundRobinSelector::new();
        let hs = hosts(&["a", "b"]);
        let mut props = Properties::new();
        props.insert(ROUND_ROBIN_HOST_WEIGHT_KEY.to_string(), "a:notanint".to_string());
        let err = selector.select(&hs, true, &props).await.unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Configuration { .. }));
    }

    #[tokio::test]
    async fn set_round_robin_weight_seeds_from_topology() {
        let hs = vec![H::new("a", 1).with_weight(3), H::new("b", 1).with_weight(7)];
        let mut props = Properties::new();
        set_round_robin_weight(&hs, &mut props);
        assert_eq!(props.get(ROUND_ROBIN_HOST_WEIGHT_KEY).unwrap(), "a:3,b:7");
    }
}
