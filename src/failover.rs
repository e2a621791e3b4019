//! Orchestrates reconnection to a surviving node, honoring a caller-selected role policy,
//! within a deadline.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::ErrorKind;
use crate::host::{writer_of, Host};
use crate::monitor::{ClusterTopologyMonitor, SessionFactory};
use crate::selector::{set_round_robin_weight, HostSelector, Properties};
use crate::session::DbSession;
use crate::topology::QueryHelper;
use crate::util::conn_string::ConnectionString;
use crate::util::dns::is_reader_cluster_endpoint;
use crate::Result;

/// Backoff between reader-failover rounds when an entire pass exhausts without success and the
/// deadline hasn't expired yet.
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// The role constraint a reconnected session must satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailoverMode {
    StrictWriter,
    StrictReader,
    ReaderOrWriter,
}

impl FailoverMode {
    /// Parses the `FAILOVERMODE` connection-string value, case-insensitively.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "STRICT_WRITER" => Ok(Self::StrictWriter),
            "STRICT_READER" => Ok(Self::StrictReader),
            "READER_OR_WRITER" => Ok(Self::ReaderOrWriter),
            other => Err(ErrorKind::configuration(format!("unknown failover mode {other:?}")).into()),
        }
    }

    /// The default when no mode is configured explicitly: `READER_OR_WRITER` if the original
    /// host's DNS matches a reader-cluster endpoint, else `STRICT_WRITER`.
    pub fn default_for_host(original_host: &str) -> Self {
        if is_reader_cluster_endpoint(original_host) {
            Self::ReaderOrWriter
        } else {
            Self::StrictWriter
        }
    }
}

/// The outcome of a [`FailoverService::failover`] call.
pub enum FailoverResult {
    /// The SQL state wasn't in the communication-link family; no failover was attempted.
    Skipped,
    /// A new, role-compliant session was established.
    Succeeded(Box<dyn DbSession>),
    /// The deadline expired, or no candidate satisfied the role constraint.
    Failed,
}

impl fmt::Debug for FailoverResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "Skipped"),
            Self::Succeeded(_) => write!(f, "Succeeded(_)"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Orchestrates reconnection for one cluster, backed by its [`ClusterTopologyMonitor`].
///
/// Connect/Query errors encountered while probing candidate hosts are recovered locally (the
/// candidate is dropped and the next one is tried); only `Configuration` errors from the
/// selector propagate out of `failover` itself, surfacing as [`FailoverResult::Failed`] to the
/// caller via the registry layer.
pub struct FailoverService {
    monitor: Arc<ClusterTopologyMonitor>,
    factory: Arc<dyn SessionFactory>,
    query: QueryHelper,
    selector: Arc<dyn HostSelector>,
    base_conn_string: ConnectionString,
    failover_timeout: Duration,
    current_host: Mutex<Option<Host>>,
}

impl FailoverService {
    pub fn new(
        monitor: Arc<ClusterTopologyMonitor>,
        factory: Arc<dyn SessionFactory>,
        query: QueryHelper,
        selector: Arc<dyn HostSelector>,
        base_conn_string: ConnectionString,
        failover_timeout: Duration,
    ) -> Self {
        Self {
            monitor,
            factory,
            query,
            selector,
            base_conn_string,
            failover_timeout,
            current_host: Mutex::new(None),
        }
    }

    /// The last successfully chosen host. `None` before the first successful failover.
    pub async fn current_host(&self) -> Option<Host> {
        self.current_host.lock().await.clone()
    }

    #[instrument(skip(self, properties))]
    pub async fn failover(
        &self,
        sql_state: &str,
        original_host: &str,
        configured_mode: Option<FailoverMode>,
        properties: &Properties,
    ) -> Result<FailoverResult> {
        if !sql_state.starts_with("08") {
            return Ok(FailoverResult::Skipped);
        }

        let mode = configured_mode.unwrap_or_else(|| FailoverMode::default_for_host(original_host));
        info!(mode = ?mode, sql_state, "failover triggered");

        match mode {
            FailoverMode::StrictWriter => self.writer_failover(properties).await,
            FailoverMode::StrictReader | FailoverMode::ReaderOrWriter => {
                self.reader_failover(mode, properties).await
            }
        }
    }

    async fn try_connect(&self, host: &Host) -> Option<Box<dyn DbSession>> {
        let mut session = self.factory.new_session().await.ok()?;
        let conn_string = self.base_conn_string.for_target_host(host.host()).to_string_rebuilt();
        match session.connect(&conn_string).await {
            Ok(()) => Some(session),
            Err(err) => {
                warn!(host = %host, error = %err, "failover candidate connect failed");
                None
            }
        }
    }

    async fn writer_failover(&self, properties: &Properties) -> Result<FailoverResult> {
        let topology = self.monitor.force_refresh(true, self.failover_timeout).await;
        let host = match self.selector.select(&topology, true, properties).await {
            Ok(host) => host,
            Err(err) if matches!(err.kind(), ErrorKind::Configuration { .. }) => return Err(err),
            Err(_) => return Ok(FailoverResult::Failed),
        };

        let mut session = match self.try_connect(&host).await {
            Some(session) => session,
            None => return Ok(FailoverResult::Failed),
        };

        // A demoted node must never be accepted under STRICT_WRITER.
        match self.query.is_reader(session.as_mut()).await {
            Some(false) => {
                *self.current_host.lock().await = Some(host.clone());
                info!(host = %host, "writer failover succeeded");
                Ok(FailoverResult::Succeeded(session))
            }
            _ => {
                session.close().await;
                Ok(FailoverResult::Failed)
            }
        }
    }

    async fn reader_failover(&self, mode: FailoverMode, properties: &Properties) -> Result<FailoverResult> {
        let topology = self.monitor.force_refresh(false, Duration::from_millis(0)).await;
        let original_writer = writer_of(&topology).cloned();
        let mut remaining: Vec<Host> = topology.into_iter().filter(|h| !h.is_writer).collect();

        // Nothing to exhaust and nothing to fall back to trying under STRICT_READER.
        if mode == FailoverMode::StrictReader && remaining.is_empty() {
            return Ok(FailoverResult::Failed);
        }

        let mut props = properties.clone();
        let deadline = Instant::now() + self.failover_timeout;
        let mut writer_confirmed_as_writer = false;

        loop {
            set_round_robin_weight(&remaining, &mut props);
            let mut working = remaining.clone();

            while !working.is_empty() {
                let host = match self.selector.select(&working, false, &props).await {
                    Ok(host) => host,
                    Err(err) if matches!(err.kind(), ErrorKind::Configuration { .. }) => return Err(err),
                    Err(_) => break,
                };
                working.retain(|h| h != &host);

                let mut session = match self.try_connect(&host).await {
                    Some(session) => session,
                    None => {
                        remaining.retain(|h| h != &host);
                        continue;
                    }
                };

                match (mode, self.query.is_reader(session.as_mut()).await) {
                    (_, Some(true)) | (FailoverMode::ReaderOrWriter, Some(false)) => {
                        *self.current_host.lock().await = Some(host.clone());
                        info!(host = %host, mode = ?mode, "reader failover succeeded");
                        return Ok(FailoverResult::Succeeded(session));
                    }
                    (FailoverMode::StrictReader, Some(false)) => {
                        // Really a writer; it can never satisfy STRICT_READER, drop it for good.
                        session.close().await;
                        remaining.retain(|h| h != &host);
                    }
                    (_, None) => session.close().await,
                }
            }

            if Instant::now() >= deadline {
                return Ok(FailoverResult::Failed);
            }

            if let Some(ref writer) = original_writer {
                let should_try = !(mode == FailoverMode::StrictReader && writer_confirmed_as_writer);
                if should_try {
                    if let Some(mut session) = self.try_connect(writer).await {
                        match (mode, self.query.is_reader(session.as_mut()).await) {
                            (_, Some(true)) | (FailoverMode::ReaderOrWriter, Some(false)) => {
                                *self.current_host.lock().await = Some(writer.clone());
                                info!(host = %writer, mode = ?mode, "reader failover fell back to original writer");
                                return Ok(FailoverResult::Succeeded(session));
                            }
                            (FailoverMode::StrictReader, Some(false)) => {
                                writer_confirmed_as_writer = true;
                                session.close().await;
                            }
                            (_, None) => session.close().await,
                        }
                    }
                }
            } else if remaining.is_empty() {
                return Ok(FailoverResult::Failed);
            }

            if Instant::now() >= deadline {
                return Ok(FailoverResult::Failed);
            }
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::cache::TtlCache;
    use crate::dialect::AuroraPostgresDialect;
    use crate::monitor::MonitorConfig;
    use crate::selector::RandomSelector;
    use crate::test_util::MockSession;

    struct QueueFactory {
        sessions: TokioMutex<VecDeque<MockSession>>,
    }

    impl QueueFactory {
        fn new(sessions: Vec<MockSession>) -> Self {
            Self {
                sessions: TokioMutex::new(sessions.into()),
            }
        }
    }

    #[async_trait]
    impl SessionFactory for QueueFactory {
        async fn acquire_environment(&self) -> Result<()> {
            Ok(())
        }
        async fn new_session(&self) -> Result<Box<dyn DbSession>> {
            let mut guard = self.sessions.lock().await;
            Ok(Box::new(guard.pop_front().unwrap_or_default()))
        }
    }

    async fn monitor_with_cached_topology(
        factory: Arc<dyn SessionFactory>,
        hosts: Vec<Host>,
    ) -> Arc<ClusterTopologyMonitor> {
        let cache = Arc::new(TtlCache::new());
        cache.put("clusterA".to_string(), hosts).await;
        let query = QueryHelper::new(Arc::new(AuroraPostgresDialect), "?.cluster.example.com");
        ClusterTopologyMonitor::new(
            MonitorConfig {
                cluster_id: "clusterA".to_string(),
                ignore_topology_request: Duration::from_secs(30),
                high_refresh_rate: Duration::from_millis(50),
                refresh_rate: Duration::from_secs(30),
            },
            cache,
            query,
            factory,
            ConnectionString::parse("Server=clusterA.cluster.example.com;EnableClusterFailover=0"),
        )
        .await
        .unwrap()
    }

    fn helper() -> QueryHelper {
        QueryHelper::new(Arc::new(AuroraPostgresDialect), "?.cluster.example.com")
    }

    #[tokio::test]
    async fn non_communication_sql_state_is_skipped() {
        let factory: Arc<dyn SessionFactory> = Arc::new(QueueFactory::new(vec![]));
        let monitor = monitor_with_cached_topology(factory.clone(), vec![]).await;
        let service = FailoverService::new(
            monitor,
            factory,
            helper(),
            Arc::new(RandomSelector::new()),
            ConnectionString::parse("Server=clusterA.cluster.example.com"),
            Duration::from_millis(200),
        );

        let result = service
            .failover("42000", "clusterA.cluster.example.com", None, &Properties::new())
            .await
            .unwrap();
        assert!(matches!(result, FailoverResult::Skipped));
    }

    #[tokio::test]
    async fn reader_failover_falls_back_to_original_writer_under_reader_or_writer() {
        let w1 = Host::new("w1.cluster.example.com", 5432).with_writer(true);
        let r1 = Host::new("r1.cluster.example.com", 5432);

        let mut unreachable_reader = MockSession::new();
        unreachable_reader.fail_next_connect();
        let mut writer_session = MockSession::new();
        writer_session.push_rows(vec![vec![Some("f".into())]]); // is_reader => false (it's the writer)

        let factory: Arc<dyn SessionFactory> =
            Arc::new(QueueFactory::new(vec![unreachable_reader, writer_session]));
        let monitor = monitor_with_cached_topology(factory.clone(), vec![w1.clone(), r1]).await;
        let service = FailoverService::new(
            monitor,
            factory,
            helper(),
            Arc::new(RandomSelector::new()),
            ConnectionString::parse("Server=clusterA.cluster.example.com;EnableClusterFailover=0"),
            Duration::from_millis(500),
        );

        let result = service
            .failover("08S01", "clusterA.cluster.example.com", Some(FailoverMode::ReaderOrWriter), &Properties::new())
            .await
            .unwrap();
        assert!(matches!(result, FailoverResult::Succeeded(_)));
        assert_eq!(service.current_host().await.unwrap().host(), w1.host());
    }

    #[tokio::test]
    async fn strict_reader_with_no_readers_fails_without_touching_writer() {
        let w1 = Host::new("w1.cluster.example.com", 5432).with_writer(true);
        let factory: Arc<dyn SessionFactory> = Arc::new(QueueFactory::new(vec![]));
        let monitor = monitor_with_cached_topology(factory.clone(), vec![w1]).await;
        let service = FailoverService::new(
            monitor,
            factory,
            helper(),
            Arc::new(RandomSelector::new()),
            ConnectionString::parse("Server=clusterA.cluster.example.com;EnableClusterFailover=0"),
            Duration::from_millis(200),
        );

        let result = service
            .failover("08S01", "clusterA.cluster.example.com", Some(FailoverMode::StrictReader), &Properties::new())
            .await
            .unwrap();
        assert!(matches!(result, FailoverResult::Failed));
    }
}
