//! [`ClusterTopologyMonitor`]: the main worker that alternates between `Regular` and `Panic`
//! modes, plus the public `force_refresh` entry points callers use to request a fresh topology.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::factory::SessionFactory;
use super::probe::NodeProbe;
use super::shared::{Mode, SharedState};
use crate::cache::TtlCache;
use crate::error::ErrorKind;
use crate::host::Topology;
use crate::session::DbSession;
use crate::topology::QueryHelper;
use crate::util::conn_string::ConnectionString;
use crate::Result;

/// How long `Regular` mode keeps using `high_refresh_rate` after recovering from `Panic`, to
/// ride out any trailing instability right after a promotion.
const POST_PANIC_GRACE: Duration = Duration::from_secs(30);

/// Tunables that parameterize one monitor instance; everything here is per-cluster.
pub struct MonitorConfig {
    pub cluster_id: String,
    pub ignore_topology_request: Duration,
    pub high_refresh_rate: Duration,
    pub refresh_rate: Duration,
}

/// The background supervisor that keeps one cluster's topology fresh in the shared cache.
///
/// Constructed via [`ClusterTopologyMonitor::new`], started with [`Self::start`], and retired
/// with [`Self::shutdown`] — which stops the main loop, signals any running probes to stop, and
/// joins every spawned task before returning, so no probe task is ever leaked.
pub struct ClusterTopologyMonitor {
    cluster_id: String,
    cache: Arc<TtlCache<String, Topology>>,
    query: QueryHelper,
    factory: Arc<dyn SessionFactory>,
    base_conn_string: ConnectionString,
    ignore_topology_request: Duration,
    high_refresh_rate: Duration,
    refresh_rate: Duration,
    shared: Arc<SharedState>,
    main_task: Mutex<Option<JoinHandle<()>>>,
    probe_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterTopologyMonitor {
    /// Acquires the session factory's environment handle (fatal on failure, per
    /// `ErrorKind::Construction`) and returns an unstarted monitor.
    pub async fn new(
        config: MonitorConfig,
        cache: Arc<TtlCache<String, Topology>>,
        query: QueryHelper,
        factory: Arc<dyn SessionFactory>,
        base_conn_string: ConnectionString,
    ) -> Result<Arc<Self>> {
        factory.acquire_environment().await.map_err(|err| {
            ErrorKind::Construction {
                cluster_id: config.cluster_id.clone(),
                message: err.to_string(),
            }
            .into()
        })?;

        Ok(Arc::new(Self {
            cluster_id: config.cluster_id,
            cache,
            query,
            factory,
            base_conn_string,
            ignore_topology_request: config.ignore_topology_request,
            high_refresh_rate: config.high_refresh_rate,
            refresh_rate: config.refresh_rate,
            shared: Arc::new(SharedState::new()),
            main_task: Mutex::new(None),
            probe_tasks: Mutex::new(Vec::new()),
        }))
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Idempotent: launches the main worker if it isn't already running.
    pub async fn start(self: &Arc<Self>) {
        let mut guard = self.main_task.lock().await;
        if guard.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *guard = Some(tokio::spawn(this.run_main_loop()));
    }

    /// Requests a fresh topology and waits up to `timeout` for one to be published, honoring the
    /// ignore-new-requests window. Returns whatever the cache holds when it wakes — which may
    /// still be the old topology if time ran out.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self, verify_writer: bool, timeout: Duration) -> Topology {
        if self.shared.ignore_window_active().await {
            if let Some(topology) = self.cache.get(&self.cluster_id).await {
                return topology;
            }
        }

        if verify_writer {
            *self.shared.main_session.lock().await = None;
            self.shared.is_writer_connection.store(false, Ordering::SeqCst);
        }

        self.shared.request_update();

        let notified = self.shared.topology_updated.notified();
        tokio::pin!(notified);
        let _ = tokio::time::timeout(timeout, notified).await;

        self.cache.get(&self.cluster_id).await.unwrap_or_default()
    }

    /// Refreshes using a caller-supplied session when a verified writer session already exists
    /// (behaves like [`Self::force_refresh`]); otherwise queries and publishes directly through
    /// `session` without touching the monitor's own session or probe pool.
    ///
    /// `timeout_ms` is accepted for interface parity with the other overload. Because it is an
    /// unsigned millisecond count, "has the deadline passed" is never true before the query
    /// below returns, so the blocking wait this mirrors in the source system never actually
    /// executes here either — the immediate, already-available cache read is what callers get.
    pub async fn force_refresh_with_session(&self, session: &mut dyn DbSession, timeout_ms: u64) -> Topology {
        if self.shared.is_writer_connection.load(Ordering::SeqCst) {
            return self.force_refresh(true, Duration::from_millis(timeout_ms)).await;
        }

        let topology = self.query.query_topology(session).await;
        if !topology.is_empty() {
            self.cache.put(self.cluster_id.clone(), topology.clone()).await;
            self.shared.topology_updated.notify_waiters();
            return topology;
        }
        self.cache.get(&self.cluster_id).await.unwrap_or_default()
    }

    /// Stops the main loop and any running probes, then joins every spawned task.
    pub async fn shutdown(&self) {
        self.shared.is_running.store(false, Ordering::SeqCst);
        self.shared.stop_probes.store(true, Ordering::SeqCst);
        self.shared.request_update();

        if let Some(task) = self.main_task.lock().await.take() {
            let _ = task.await;
        }
        self.join_probes().await;
    }

    async fn run_main_loop(self: Arc<Self>) {
        let mut mode = Mode::Panic;
        let mut high_refresh_until: Option<Instant> = None;

        while self.shared.is_running.load(Ordering::SeqCst) {
            match mode {
                Mode::Panic => {
                    self.ensure_probes_running().await;
                    self.wait_for_request_or_timeout(self.high_refresh_rate).await;

                    if self.shared.is_writer_connection.load(Ordering::SeqCst) {
                        self.shared.stop_probes.store(true, Ordering::SeqCst);
                        self.adopt_donated_writer_session().await;
                        info!(cluster_id = %self.cluster_id, "recovered a writer session, entering regular mode");
                        mode = Mode::Regular;
                        high_refresh_until = Some(Instant::now() + POST_PANIC_GRACE);
                    }
                }
                Mode::Regular => {
                    let topology = self.query_via_main_session().await;
                    if topology.is_empty() {
                        warn!(cluster_id = %self.cluster_id, "main session topology query came back empty, entering panic mode");
                        self.transition_to_panic().await;
                        mode = Mode::Panic;
                    } else {
                        self.cache.put(self.cluster_id.clone(), topology.clone()).await;
                        *self.shared.known_hosts.lock().await = topology;
                        self.shared.topology_updated.notify_waiters();

                        let interval = match high_refresh_until {
                            Some(until) if until > Instant::now() => self.high_refresh_rate,
                            _ => {
                                high_refresh_until = None;
                                self.refresh_rate
                            }
                        };
                        self.wait_for_request_or_timeout(interval).await;
                    }
                }
            }
        }

        self.join_probes().await;
        if let Some(mut session) = self.shared.main_session.lock().await.take() {
            session.close().await;
        }
    }

    async fn query_via_main_session(&self) -> Topology {
        let mut guard = self.shared.main_session.lock().await;
        match guard.as_mut() {
            Some(session) => self.query.query_topology(session.as_mut()).await,
            None => Vec::new(),
        }
    }

    /// Opens a session to the cluster-level endpoint (typically resolving to the current
    /// writer) if no main session exists yet, verifies its role, and publishes whatever
    /// topology it sees. Installing the session into the shared slot is itself
    /// check-and-set — if another path raced ahead and filled it first, this session is closed
    /// instead of replacing it.
    async fn bootstrap_any_session(&self) {
        if self.shared.main_session.lock().await.is_some() {
            return;
        }

        let mut session = match self.factory.new_session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(cluster_id = %self.cluster_id, error = %err, "bootstrap session open failed");
                return;
            }
        };
        if let Err(err) = session.connect(&self.base_conn_string.to_string_rebuilt()).await {
            warn!(cluster_id = %self.cluster_id, error = %err, "bootstrap connect failed");
            return;
        }

        let mut guard = self.shared.main_session.lock().await;
        if guard.is_some() {
            session.close().await;
            return;
        }

        let writer_id = self.query.get_writer_id(session.as_mut()).await;
        if !writer_id.is_empty() {
            self.shared.is_writer_connection.store(true, Ordering::SeqCst);
            self.shared.arm_ignore_window(self.ignore_topology_request).await;
        }

        let topology = self.query.query_topology(session.as_mut()).await;
        if topology.is_empty() {
            session.close().await;
            self.shared.is_writer_connection.store(false, Ordering::SeqCst);
            return;
        }

        self.cache.put(self.cluster_id.clone(), topology.clone()).await;
        *self.shared.known_hosts.lock().await = topology;
        self.shared.topology_updated.notify_waiters();
        *guard = Some(session);
    }

    /// Spawns one probe per known host if the pool is currently empty, bootstrapping a session
    /// first (if necessary) to discover the host list.
    async fn ensure_probes_running(&self) {
        if !self.probe_tasks.lock().await.is_empty() {
            return;
        }

        self.bootstrap_any_session().await;

        let hosts = self.shared.known_hosts.lock().await.clone();
        if hosts.is_empty() {
            return;
        }

        self.shared.reset_panic_round();
        let mut tasks = self.probe_tasks.lock().await;
        for host in hosts {
            debug!(cluster_id = %self.cluster_id, host = %host, "spawning node probe");
            let probe = NodeProbe::new(
                host,
                &self.base_conn_string,
                self.factory.clone(),
                self.query.clone(),
                self.cache.clone(),
                self.cluster_id.clone(),
                self.shared.clone(),
                self.ignore_topology_request,
            );
            tasks.push(tokio::spawn(probe.run()));
        }
    }

    async fn adopt_donated_writer_session(&self) {
        let donated = self.shared.donated_writer_session.lock().await.take();
        if let Some(session) = donated {
            *self.shared.main_session.lock().await = Some(session);
        }
        self.join_probes().await;
    }

    async fn transition_to_panic(&self) {
        let mut guard = self.shared.main_session.lock().await;
        if let Some(mut session) = guard.take() {
            session.close().await;
        }
        self.shared.is_writer_connection.store(false, Ordering::SeqCst);
    }

    async fn join_probes(&self) {
        let mut tasks = self.probe_tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
    }

    /// Waits for either an explicit `force_refresh` wake-up or `timeout`, whichever comes
    /// first.
    async fn wait_for_request_or_timeout(&self, timeout: Duration) {
        if self.shared.request_update_topology.swap(false, Ordering::SeqCst) {
            return;
        }
        let notified = self.shared.request_update_notify.notified();
        tokio::pin!(notified);
        let _ = tokio::time::timeout(timeout, notified).await;
        self.shared.request_update_topology.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::dialect::AuroraPostgresDialect;
    use crate::test_util::MockSession;
    use crate::topology::QueryHelper;
    use crate::util::conn_string::ConnectionString;

    /// Hands out pre-scripted sessions in order, then falls back to blank (unscripted,
    /// connect-succeeds) sessions once the queue is drained — enough for background probes
    /// that don't matter to a given test to run harmlessly.
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

    fn query_helper() -> QueryHelper {
        QueryHelper::new(Arc::new(AuroraPostgresDialect), "?.cluster.example.com")
    }

    #[tokio::test]
    async fn cold_start_publishes_topology_from_bootstrap_session() {
        let mut bootstrap = MockSession::new();
        bootstrap.push_rows(vec![vec![Some("w1".into())]]);
        bootstrap.push_rows(vec![
            vec![Some("w1".into()), Some("1".into()), Some("0".into()), Some("0".into()), None],
            vec![Some("r1".into()), Some("0".into()), Some("0".into()), Some("0".into()), None],
            vec![Some("r2".into()), Some("0".into()), Some("0".into()), Some("0".into()), None],
        ]);

        let factory: Arc<dyn SessionFactory> = Arc::new(QueueFactory::new(vec![bootstrap]));
        let cache = Arc::new(TtlCache::new());
        let monitor = ClusterTopologyMonitor::new(
            MonitorConfig {
                cluster_id: "clusterA".to_string(),
                ignore_topology_request: Duration::from_millis(500),
                high_refresh_rate: Duration::from_millis(50),
                refresh_rate: Duration::from_millis(500),
            },
            cache.clone(),
            query_helper(),
            factory,
            ConnectionString::parse("Server=clusterA.cluster.example.com;EnableClusterFailover=0"),
        )
        .await
        .unwrap();

        monitor.start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let topology = monitor.force_refresh(false, Duration::from_millis(0)).await;
        assert_eq!(topology.len(), 3);
        assert_eq!(crate::host::writer_of(&topology).unwrap().host(), "w1.cluster.example.com");

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn construction_fails_when_environment_acquisition_fails() {
        struct FailingFactory;
        #[async_trait]
        impl SessionFactory for FailingFactory {
            async fn acquire_environment(&self) -> Result<()> {
                Err(ErrorKind::Construction {
                    cluster_id: "clusterA".to_string(),
                    message: "no driver manager".to_string(),
                }
                .into())
            }
            async fn new_session(&self) -> Result<Box<dyn DbSession>> {
                unreachable!("never reached once acquire_environment fails")
            }
        }

        let result = ClusterTopologyMonitor::new(
            MonitorConfig {
                cluster_id: "clusterA".to_string(),
                ignore_topology_request: Duration::from_millis(500),
                high_refresh_rate: Duration::from_millis(50),
                refresh_rate: Duration::from_millis(500),
            },
            Arc::new(TtlCache::new()),
            query_helper(),
            Arc::new(FailingFactory),
            ConnectionString::parse("Server=clusterA;EnableClusterFailover=0"),
        )
        .await;

        assert!(matches!(result.unwrap_err().kind(), ErrorKind::Construction { .. }));
    }
}
