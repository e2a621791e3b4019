//! A reference-counted registry that shares one topology monitor and failover service per
//! cluster across many client connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::info;

use crate::cache::TtlCache;
use crate::dialect::Dialect;
use crate::error::ErrorKind;
use crate::failover::{FailoverMode, FailoverResult, FailoverService};
use crate::host::{Host, Topology};
use crate::monitor::{ClusterTopologyMonitor, MonitorConfig, SessionFactory};
use crate::options::ClusterFailoverOptions;
use crate::selector::{HostSelector, Properties};
use crate::topology::QueryHelper;
use crate::util::conn_string::ConnectionString;
use crate::util::dns::{cluster_id_of, derive_endpoint_template};
use crate::Result;

/// Everything needed to construct (or attach to) one cluster's monitor and failover service.
pub struct StartOptions {
    /// Explicit cluster id; if absent, derived from `connection_string`'s `SERVER` value.
    pub cluster_id: Option<String>,
    pub dialect: Arc<dyn Dialect>,
    pub connection_string: ConnectionString,
    pub factory: Arc<dyn SessionFactory>,
    pub selector: Arc<dyn HostSelector>,
    /// Explicit endpoint template; if absent, derived from `connection_string`'s `SERVER` value.
    pub host_pattern: Option<String>,
    pub ignore_topology_request: Duration,
    pub high_refresh_rate: Duration,
    pub refresh_rate: Duration,
    pub failover_timeout: Duration,
}

struct ServiceEntry {
    reference_count: AtomicUsize,
    failover_in_progress: AtomicUsize,
    monitor: Arc<ClusterTopologyMonitor>,
    failover_service: Arc<FailoverService>,
}

/// Process-wide `cluster_id → ServiceEntry` map plus the topology cache every monitor publishes
/// into. A decrement of `reference_count` to zero while a failover is in flight never tears down
/// the entry; the next `stop_failover_service` call after the failover completes does.
pub struct ClusterServiceRegistry {
    services: Mutex<HashMap<String, Arc<ServiceEntry>>>,
    cache: Arc<TtlCache<String, Topology>>,
}

impl Default for ClusterServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            cache: Arc::new(TtlCache::new()),
        }
    }

    /// The shared topology cache every monitor in this registry publishes into.
    pub fn cache(&self) -> Arc<TtlCache<String, Topology>> {
        self.cache.clone()
    }

    /// Convenience entry point building [`StartOptions`] from a parsed [`ClusterFailoverOptions`]
    /// plus the two collaborators it can't derive on its own (the session factory and the host
    /// selector strategy's concrete instance).
    pub async fn start_failover_service_with_options(
        &self,
        options: &ClusterFailoverOptions,
        connection_string: ConnectionString,
        factory: Arc<dyn SessionFactory>,
    ) -> Result<String> {
        self.start_failover_service(StartOptions {
            cluster_id: options.cluster_id.clone(),
            dialect: options.dialect.clone(),
            connection_string,
            factory,
            selector: options.reader_host_selector_strategy.build(),
            host_pattern: options.host_pattern.clone(),
            ignore_topology_request: options.ignore_topology_request,
            high_refresh_rate: options.high_refresh_rate,
            refresh_rate: options.refresh_rate,
            failover_timeout: options.failover_timeout,
        })
        .await
    }

    /// Starts (or attaches to, via reference count) the failover service for one cluster.
    /// Returns the resolved `cluster_id` — explicit if supplied, otherwise derived from the
    /// connection string's host.
    pub async fn start_failover_service(&self, options: StartOptions) -> Result<String> {
        let server = options
            .connection_string
            .get(crate::util::conn_string::KEY_SERVER)
            .unwrap_or_default()
            .to_string();

        let cluster_id = match options.cluster_id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => cluster_id_of(&server).ok_or_else(|| {
                ErrorKind::configuration("cannot derive cluster_id: no CLUSTERID supplied and SERVER is not a cluster endpoint")
            })?,
        };

        let mut services = self.services.lock().await;
        if let Some(entry) = services.get(&cluster_id) {
            entry.reference_count.fetch_add(1, Ordering::SeqCst);
            return Ok(cluster_id);
        }

        let host_pattern = match options.host_pattern {
            Some(pattern) => pattern,
            None => derive_endpoint_template(&server).ok_or_else(|| {
                ErrorKind::configuration("cannot derive HOSTPATTERN: no value supplied and SERVER is not a recognized endpoint")
            })?,
        };

        let query = QueryHelper::new(options.dialect, host_pattern);
        let base_conn_string = options.connection_string.with_failover_disabled();

        let monitor = ClusterTopologyMonitor::new(
            MonitorConfig {
                cluster_id: cluster_id.clone(),
                ignore_topology_request: options.ignore_topology_request,
                high_refresh_rate: options.high_refresh_rate,
                refresh_rate: options.refresh_rate,
            },
            self.cache.clone(),
            query.clone(),
            options.factory.clone(),
            base_conn_string.clone(),
        )
        .await?;
        monitor.start().await;

        let failover_service = Arc::new(FailoverService::new(
            monitor.clone(),
            options.factory,
            query,
            options.selector,
            base_conn_string,
            options.failover_timeout,
        ));

        info!(cluster_id = %cluster_id, "started failover service");
        services.insert(
            cluster_id.clone(),
            Arc::new(ServiceEntry {
                reference_count: AtomicUsize::new(1),
                failover_in_progress: AtomicUsize::new(0),
                monitor,
                failover_service,
            }),
        );

        Ok(cluster_id)
    }

    /// Decrements the reference count; tears down the monitor (joining all its tasks) only if
    /// the count is zero and no failover is currently in flight. If a failover is in flight when
    /// the count reaches zero, teardown is deferred — shutdown is eventual, not synchronous, and
    /// a racing caller may need to call `stop_failover_service` again once the failover
    /// completes to actually drain it (see "Open Questions" in DESIGN.md). Calling this once the
    /// count has already reached zero re-checks `failover_in_progress` without decrementing
    /// further, which is exactly that drain call.
    pub async fn stop_failover_service(&self, cluster_id: &str) {
        let retired = {
            let mut services = self.services.lock().await;
            let Some(entry) = services.get(cluster_id) else {
                return;
            };
            if entry.reference_count.load(Ordering::SeqCst) > 0 {
                entry.reference_count.fetch_sub(1, Ordering::SeqCst);
            }
            let remaining = entry.reference_count.load(Ordering::SeqCst);
            if remaining == 0 && entry.failover_in_progress.load(Ordering::SeqCst) == 0 {
                services.remove(cluster_id)
            } else {
                None
            }
        };

        if let Some(entry) = retired {
            info!(cluster_id, "tearing down failover service");
            entry.monitor.shutdown().await;
        }
    }

    /// Looks up the service for `cluster_id` and runs a failover through it, tracking
    /// `failover_in_progress` around the call so a concurrent `stop_failover_service` can't tear
    /// the monitor down mid-failover.
    pub async fn failover_connection(
        &self,
        cluster_id: &str,
        sql_state: &str,
        original_host: &str,
        configured_mode: Option<FailoverMode>,
        properties: &Properties,
    ) -> FailoverResult {
        let entry = {
            let services = self.services.lock().await;
            match services.get(cluster_id) {
                Some(entry) => entry.clone(),
                None => return FailoverResult::Failed,
            }
        };

        entry.failover_in_progress.fetch_add(1, Ordering::SeqCst);
        let result = entry
            .failover_service
            .failover(sql_state, original_host, configured_mode, properties)
            .await;
        entry.failover_in_progress.fetch_sub(1, Ordering::SeqCst);

        result.unwrap_or(FailoverResult::Failed)
    }

    /// The host last chosen by a successful failover for `cluster_id`, if any.
    pub async fn current_host(&self, cluster_id: &str) -> Option<Host> {
        let entry = self.services.lock().await.get(cluster_id)?.clone();
        entry.failover_service.current_host().await
    }

    #[cfg(test)]
    async fn reference_count(&self, cluster_id: &str) -> Option<usize> {
        self.services
            .lock()
            .await
            .get(cluster_id)
            .map(|e| e.reference_count.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    async fn contains(&self, cluster_id: &str) -> bool {
        self.services.lock().await.contains_key(cluster_id)
    }

    #[cfg(test)]
    fn set_failover_in_progress(&self, entry: &Arc<ServiceEntry>, value: usize) {
        entry.failover_in_progress.store(value, Ordering::SeqCst);
    }
}

/// The process-wide registry instance, lazily constructed on first access.
static GLOBAL: Lazy<ClusterServiceRegistry> = Lazy::new(ClusterServiceRegistry::new);

/// Returns the process-wide [`ClusterServiceRegistry`] singleton.
pub fn global() -> &'static ClusterServiceRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::dialect::AuroraPostgresDialect;
    use crate::selector::RandomSelector;
    use crate::session::DbSession;
    use crate::test_util::MockSession;

    struct AlwaysBlankFactory;

    #[async_trait]
    impl SessionFactory for AlwaysBlankFactory {
        async fn acquire_environment(&self) -> Result<()> {
            Ok(())
        }
        async fn new_session(&self) -> Result<Box<dyn DbSession>> {
            Ok(Box::new(MockSession::new()))
        }
    }

    fn start_options(cluster_id: &str) -> StartOptions {
        StartOptions {
            cluster_id: Some(cluster_id.to_string()),
            dialect: Arc::new(AuroraPostgresDialect),
            connection_string: ConnectionString::parse(&format!(
                "Server={cluster_id}.cluster.example.com;EnableClusterFailover=1"
            )),
            factory: Arc::new(AlwaysBlankFactory),
            selector: Arc::new(RandomSelector::new()),
            host_pattern: Some("?.cluster.example.com".to_string()),
            ignore_topology_request: Duration::from_secs(30),
            high_refresh_rate: Duration::from_millis(50),
            refresh_rate: Duration::from_secs(30),
            failover_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn second_start_call_increments_refcount_without_spawning_again() {
        let registry = ClusterServiceRegistry::new();
        let id1 = registry.start_failover_service(start_options("clusterA")).await.unwrap();
        let id2 = registry.start_failover_service(start_options("clusterA")).await.unwrap();
        assert_eq!(id1, id2);
        assert_eq!(registry.reference_count("clusterA").await, Some(2));

        registry.stop_failover_service("clusterA").await;
        assert!(registry.contains("clusterA").await);
        registry.stop_failover_service("clusterA").await;
        assert!(!registry.contains("clusterA").await);
    }

    #[tokio::test]
    async fn in_flight_failover_defers_teardown_until_drained() {
        let registry = ClusterServiceRegistry::new();
        registry.start_failover_service(start_options("clusterB")).await.unwrap();

        let entry = registry.services.lock().await.get("clusterB").unwrap().clone();
        registry.set_failover_in_progress(&entry, 1);

        registry.stop_failover_service("clusterB").await;
        assert!(
            registry.contains("clusterB").await,
            "teardown must be deferred while a failover is in flight"
        );

        registry.set_failover_in_progress(&entry, 0);
        registry.stop_failover_service("clusterB").await;
        assert!(!registry.contains("clusterB").await);
    }
}
