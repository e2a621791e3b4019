//! Caller-facing configuration: [`ClusterFailoverOptions`] collects every tunable named by the
//! connection-string key table (spec §6) plus the monitor durations (spec §4.D) into one
//! type-safe builder, instead of requiring callers to hand-thread eleven positional arguments
//! through `start_failover_service`.

use std::sync::Arc;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::dialect::{AuroraPostgresDialect, Dialect};
use crate::error::ErrorKind;
use crate::failover::FailoverMode;
use crate::selector::SelectorStrategy;
use crate::util::conn_string::{
    ConnectionString, KEY_CLUSTER_ID, KEY_FAILOVER_MODE, KEY_FAILOVER_TIMEOUT, KEY_HOST_PATTERN,
    KEY_IGNORE_TOPOLOGY_REQUEST, KEY_READER_HOST_SELECTOR_STRATEGY, KEY_TOPOLOGY_HIGH_REFRESH_RATE,
    KEY_TOPOLOGY_REFRESH_RATE,
};
use crate::Result;

/// `IGNORETOPOLOGYREQUEST` default: 30s, matching the source system's
/// `DEFAULT_IGNORE_TOPOLOGY_REQUEST_MS`.
pub const DEFAULT_IGNORE_TOPOLOGY_REQUEST: Duration = Duration::from_secs(30);
/// `TOPOLOGYHIGHREFRESHRATE` default: 10s.
pub const DEFAULT_HIGH_REFRESH_RATE: Duration = Duration::from_secs(10);
/// `TOPOLOGYREFRESHRATE` default: 30s.
pub const DEFAULT_REFRESH_RATE: Duration = Duration::from_secs(30);
/// `FAILOVERTIMEOUT` default: 30s.
pub const DEFAULT_FAILOVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Every tunable a caller may supply to `start_failover_service`, either programmatically via
/// this builder or parsed from a connection string via [`ClusterFailoverOptions::from_connection_string`].
///
/// Fields with `#[builder(default)]` fall back to the `DEFAULT_*` constants above when omitted,
/// mirroring the source system's `parse_num(value, DEFAULT_...)` pattern.
#[derive(Clone, TypedBuilder)]
pub struct ClusterFailoverOptions {
    /// Explicit `CLUSTERID`; if `None`, derived from the connection string's `SERVER` host.
    #[builder(default, setter(strip_option))]
    pub cluster_id: Option<String>,

    /// Explicit `HOSTPATTERN`; if `None`, derived from the connection string's `SERVER` host.
    #[builder(default, setter(strip_option))]
    pub host_pattern: Option<String>,

    /// `FAILOVERMODE`; if `None`, resolved per-call from the original host's DNS shape (spec
    /// §4.E step 2).
    #[builder(default, setter(strip_option))]
    pub failover_mode: Option<FailoverMode>,

    #[builder(default)]
    pub reader_host_selector_strategy: SelectorStrategy,

    #[builder(default = DEFAULT_IGNORE_TOPOLOGY_REQUEST)]
    pub ignore_topology_request: Duration,

    #[builder(default = DEFAULT_HIGH_REFRESH_RATE)]
    pub high_refresh_rate: Duration,

    #[builder(default = DEFAULT_REFRESH_RATE)]
    pub refresh_rate: Duration,

    #[builder(default = DEFAULT_FAILOVER_TIMEOUT)]
    pub failover_timeout: Duration,

    /// The dialect supplying topology/writer-id/node-id/is-reader queries and a default port.
    /// Defaults to the one concrete dialect this crate ships.
    #[builder(default_code = "Arc::new(AuroraPostgresDialect)")]
    pub dialect: Arc<dyn Dialect>,
}

impl ClusterFailoverOptions {
    /// Parses the subset of `conn_str`'s recognized keys (spec §6) into options, leaving
    /// anything unset to its default. Invalid values (non-numeric durations, an unknown
    /// `FAILOVERMODE`/`READERHOSTSELECTORSTRATEGY`) surface as `ErrorKind::Configuration`.
    pub fn from_connection_string(conn_str: &ConnectionString) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(id) = conn_str.get(KEY_CLUSTER_ID).filter(|s| !s.is_empty()) {
            builder = builder.cluster_id(id.to_string());
        }
        if let Some(pattern) = conn_str.get(KEY_HOST_PATTERN).filter(|s| !s.is_empty()) {
            builder = builder.host_pattern(pattern.to_string());
        }
        if let Some(mode) = conn_str.get(KEY_FAILOVER_MODE).filter(|s| !s.is_empty()) {
            builder = builder.failover_mode(FailoverMode::parse(mode)?);
        }

        let strategy = match conn_str.get(KEY_READER_HOST_SELECTOR_STRATEGY).filter(|s| !s.is_empty()) {
            Some(raw) => SelectorStrategy::parse(raw)?,
            None => SelectorStrategy::default(),
        };

        let ignore_topology_request = parse_millis(
            conn_str.get(KEY_IGNORE_TOPOLOGY_REQUEST),
            DEFAULT_IGNORE_TOPOLOGY_REQUEST,
            KEY_IGNORE_TOPOLOGY_REQUEST,
        )?;
        let high_refresh_rate = parse_millis(
            conn_str.get(KEY_TOPOLOGY_HIGH_REFRESH_RATE),
            DEFAULT_HIGH_REFRESH_RATE,
            KEY_TOPOLOGY_HIGH_REFRESH_RATE,
        )?;
        let refresh_rate = parse_millis(
            conn_str.get(KEY_TOPOLOGY_REFRESH_RATE),
            DEFAULT_REFRESH_RATE,
            KEY_TOPOLOGY_REFRESH_RATE,
        )?;
        let failover_timeout = parse_millis(
            conn_str.get(KEY_FAILOVER_TIMEOUT),
            DEFAULT_FAILOVER_TIMEOUT,
            KEY_FAILOVER_TIMEOUT,
        )?;

        Ok(builder
            .reader_host_selector_strategy(strategy)
            .ignore_topology_request(ignore_topology_request)
            .high_refresh_rate(high_refresh_rate)
            .refresh_rate(refresh_rate)
            .failover_timeout(failover_timeout)
            .build())
    }
}

fn parse_millis(raw: Option<&str>, default: Duration, key: &str) -> Result<Duration> {
    match raw.filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(raw) => {
            let ms: u64 = raw.parse().map_err(|_| -> crate::Error {
                ErrorKind::configuration(format!("{key} is not a valid millisecond count: {raw:?}")).into()
            })?;
            Ok(Duration::from_millis(ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_when_keys_absent() {
        let cs = ConnectionString::parse("Server=mydb.cluster-abc.us-east-1.rds.amazonaws.com");
        let opts = ClusterFailoverOptions::from_connection_string(&cs).unwrap();
        assert_eq!(opts.ignore_topology_request, DEFAULT_IGNORE_TOPOLOGY_REQUEST);
        assert_eq!(opts.high_refresh_rate, DEFAULT_HIGH_REFRESH_RATE);
        assert_eq!(opts.refresh_rate, DEFAULT_REFRESH_RATE);
        assert_eq!(opts.failover_timeout, DEFAULT_FAILOVER_TIMEOUT);
        assert_eq!(opts.reader_host_selector_strategy, SelectorStrategy::Random);
        assert!(opts.cluster_id.is_none());
    }

    #[test]
    fn parses_overridden_keys() {
        let cs = ConnectionString::parse(
            "Server=mydb.cluster-abc.us-east-1.rds.amazonaws.com;\
             FailoverMode=STRICT_READER;ReaderHostSelectorStrategy=round_robin;\
             TopologyRefreshRate=15000;FailoverTimeout=5000;ClusterId=explicit-id",
        );
        let opts = ClusterFailoverOptions::from_connection_string(&cs).unwrap();
        assert_eq!(opts.failover_mode, Some(FailoverMode::StrictReader));
        assert_eq!(opts.reader_host_selector_strategy, SelectorStrategy::RoundRobin);
        assert_eq!(opts.refresh_rate, Duration::from_millis(15000));
        assert_eq!(opts.failover_timeout, Duration::from_millis(5000));
        assert_eq!(opts.cluster_id.as_deref(), Some("explicit-id"));
    }

    #[test]
    fn rejects_non_numeric_duration() {
        let cs = ConnectionString::parse("Server=s;FailoverTimeout=soon");
        let err = ClusterFailoverOptions::from_connection_string(&cs).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Configuration { .. }));
    }
}
