//! A transient worker that holds a session to one host and reports its role, for the duration
//! of one panic round.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::factory::SessionFactory;
use super::shared::SharedState;
use crate::cache::TtlCache;
use crate::host::{writer_of, Host, Topology};
use crate::session::DbSession;
use crate::topology::QueryHelper;
use crate::util::conn_string::ConnectionString;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

pub struct NodeProbe {
    host: Host,
    conn_string: String,
    factory: Arc<dyn SessionFactory>,
    query: QueryHelper,
    cache: Arc<TtlCache<String, Topology>>,
    cluster_id: String,
    shared: Arc<SharedState>,
    ignore_window: Duration,
    session: Option<Box<dyn DbSession>>,
}

impl NodeProbe {
    pub fn new(
        host: Host,
        base_conn_string: &ConnectionString,
        factory: Arc<dyn SessionFactory>,
        query: QueryHelper,
        cache: Arc<TtlCache<String, Topology>>,
        cluster_id: String,
        shared: Arc<SharedState>,
        ignore_window: Duration,
    ) -> Self {
        let conn_string = base_conn_string.for_target_host(host.host()).to_string_rebuilt();
        Self {
            host,
            conn_string,
            factory,
            query,
            cache,
            cluster_id,
            shared,
            ignore_window,
            session: None,
        }
    }

    /// Runs until `stop_probes` is set, then closes any still-owned session. Never panics on a
    /// connect/query failure — those are logged and retried on the next tick.
    pub async fn run(mut self) {
        while !self.shared.stop_probes.load(Ordering::SeqCst) {
            self.ensure_connected().await;

            if let Some(mut session) = self.session.take() {
                let writer_id = self.query.get_writer_id(session.as_mut()).await;
                if !writer_id.is_empty() {
                    self.claim_writer(session).await;
                } else {
                    self.maybe_publish_as_reader(session.as_mut()).await;
                    self.session = Some(session);
                }
            }

            if self.shared.stop_probes.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }

        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    async fn ensure_connected(&mut self) {
        if self.session.is_some() {
            return;
        }
        let mut session = match self.factory.new_session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(host = %self.host, error = %err, "probe failed to open a session");
                return;
            }
        };
        match session.connect(&self.conn_string).await {
            Ok(()) => self.session = Some(session),
            Err(err) => warn!(host = %self.host, error = %err, "probe connect failed"),
        }
    }

    /// Claims the writer slot if no other probe has, publishes topology through this session,
    /// and donates the session to the main worker. If claimed but the topology query comes back
    /// empty, releases the claim so another probe (or a later tick of this one) can retry.
    async fn claim_writer(&mut self, mut session: Box<dyn DbSession>) {
        if self.shared.writer_claimed.swap(true, Ordering::SeqCst) {
            self.session = Some(session);
            return;
        }

        let topology = self.query.query_topology(session.as_mut()).await;
        if topology.is_empty() {
            self.shared.writer_claimed.store(false, Ordering::SeqCst);
            self.session = Some(session);
            return;
        }

        debug!(host = %self.host, cluster_id = %self.cluster_id, "probe claimed writer slot");
        self.cache.put(self.cluster_id.clone(), topology.clone()).await;
        *self.shared.writer_host.lock().await = Some(self.host.clone());
        self.shared.is_writer_connection.store(true, Ordering::SeqCst);
        self.shared.arm_ignore_window(self.ignore_window).await;
        *self.shared.donated_writer_session.lock().await = Some(session);
        self.shared.stop_probes.store(true, Ordering::SeqCst);
        self.shared.topology_updated.notify_waiters();
    }

    /// Reader-probe behavior: the first reader to notice no writer has been claimed yet takes
    /// on publishing topology each tick ("topology updater"); any reader, elected or not,
    /// publishes immediately if it observes the writer has changed since the last publication.
    async fn maybe_publish_as_reader(&mut self, session: &mut dyn DbSession) {
        if self.shared.writer_claimed.load(Ordering::SeqCst) {
            return;
        }

        let is_updater = !self.shared.topology_updater_claimed.swap(true, Ordering::SeqCst);

        let previous_writer = {
            let latest = self.shared.latest_probe_topology.lock().await;
            latest.as_ref().and_then(writer_of).map(|h| h.host().to_string())
        };

        let topology = self.query.query_topology(session).await;
        if topology.is_empty() {
            return;
        }

        let current_writer = writer_of(&topology).map(|h| h.host().to_string());
        let writer_changed = previous_writer != current_writer;

        if is_updater || writer_changed {
            self.cache.put(self.cluster_id.clone(), topology.clone()).await;
            *self.shared.latest_probe_topology.lock().await = Some(topology);
            self.shared.topology_updated.notify_waiters();
        }
    }
}
