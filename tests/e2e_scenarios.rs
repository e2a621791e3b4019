//! End-to-end scenarios driven through the public `ClusterServiceRegistry` API against a
//! scripted, host-routed session factory rather than a live database.
//!
//! Unlike the crate's own internal unit tests (which mostly bypass `monitor.start()` entirely
//! by pre-populating the cache directly), these spin up the real monitor, including its
//! background probes, so the session factory's behavior is keyed by *target host* rather than
//! by call order — probes and the failover service may race to connect to the same host, but
//! both see the same deterministic script for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rds_cluster_failover::dialect::{AuroraPostgresDialect, Dialect};
use rds_cluster_failover::failover::{FailoverMode, FailoverResult};
use rds_cluster_failover::monitor::SessionFactory;
use rds_cluster_failover::registry::{ClusterServiceRegistry, StartOptions};
use rds_cluster_failover::selector::{Properties, RandomSelector};
use rds_cluster_failover::session::{DbSession, Row};
use rds_cluster_failover::test_util::connect_failure;
use rds_cluster_failover::util::conn_string::ConnectionString;
use rds_cluster_failover::Result;

/// Installs a `tracing` subscriber honoring `RUST_LOG`, so a failing scenario can be re-run
/// with e.g. `RUST_LOG=rds_cluster_failover=debug` to see the monitor's state transitions.
/// Idempotent: later calls from other tests in this binary are no-ops.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The scripted behavior for one target host: what `connect` and each of the three queries
/// this crate issues (writer-id, topology, is-reader) should answer.
#[derive(Clone, Default)]
struct HostScript {
    connect_fails: bool,
    writer_id: String,
    topology: Vec<Row>,
    is_reader: Option<bool>,
}

impl HostScript {
    fn writer(topology: Vec<Row>) -> Self {
        Self {
            writer_id: "self".to_string(),
            topology,
            is_reader: Some(false),
            ..Default::default()
        }
    }

    fn reader() -> Self {
        Self {
            is_reader: Some(true),
            ..Default::default()
        }
    }

    fn unreachable() -> Self {
        Self {
            connect_fails: true,
            ..Default::default()
        }
    }
}

/// Routes every `new_session()` call to a session whose behavior is a pure function of the
/// `SERVER` value it's `connect()`-ed with, so concurrent probes and failover attempts against
/// the same host always observe the same script regardless of scheduling order. A host with no
/// entry behaves like a healthy node with nothing interesting to report (connects fine, every
/// query returns an empty result set).
struct ScriptedFactory {
    scripts: HashMap<String, HostScript>,
}

impl ScriptedFactory {
    fn new(scripts: Vec<(&str, HostScript)>) -> Self {
        Self {
            scripts: scripts.into_iter().map(|(h, s)| (h.to_string(), s)).collect(),
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn acquire_environment(&self) -> Result<()> {
        Ok(())
    }

    async fn new_session(&self) -> Result<Box<dyn DbSession>> {
        Ok(Box::new(ScriptedSession {
            scripts: self.scripts.clone(),
            script: None,
        }))
    }
}

struct ScriptedSession {
    scripts: HashMap<String, HostScript>,
    script: Option<HostScript>,
}

fn host_of(connection_string: &str) -> String {
    ConnectionString::parse(connection_string)
        .get(rds_cluster_failover::util::conn_string::KEY_SERVER)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl DbSession for ScriptedSession {
    async fn connect(&mut self, connection_string: &str) -> Result<()> {
        let host = host_of(connection_string);
        let script = self.scripts.get(&host).cloned().unwrap_or_default();
        if script.connect_fails {
            return Err(connect_failure(host, "scripted unreachable host"));
        }
        self.script = Some(script);
        Ok(())
    }

    async fn execute(&mut self, query: &str) -> Result<Vec<Row>> {
        let dialect = AuroraPostgresDialect;
        let script = self.script.clone().unwrap_or_default();
        if query == dialect.writer_id_query() {
            return Ok(if script.writer_id.is_empty() {
                Vec::new()
            } else {
                vec![vec![Some(script.writer_id)]]
            });
        }
        if query == dialect.topology_query() {
            return Ok(script.topology);
        }
        if query == dialect.is_reader_query() {
            return Ok(match script.is_reader {
                Some(true) => vec![vec![Some("t".to_string())]],
                Some(false) => vec![vec![Some("f".to_string())]],
                None => Vec::new(),
            });
        }
        Ok(Vec::new())
    }

    async fn ping(&mut self) -> bool {
        self.script.is_some()
    }

    async fn close(&mut self) {
        self.script = None;
    }
}

fn topology_rows(writer: &str, readers: &[&str]) -> Vec<Row> {
    let mut rows = vec![vec![
        Some(writer.to_string()),
        Some("1".to_string()),
        Some("0".to_string()),
        Some("0".to_string()),
        None,
    ]];
    for reader in readers {
        rows.push(vec![
            Some(reader.to_string()),
            Some("0".to_string()),
            Some("0".to_string()),
            Some("0".to_string()),
            None,
        ]);
    }
    rows
}

fn start_options(cluster_id: &str, factory: Arc<dyn SessionFactory>) -> StartOptions {
    StartOptions {
        cluster_id: Some(cluster_id.to_string()),
        dialect: Arc::new(AuroraPostgresDialect),
        connection_string: ConnectionString::parse(&format!(
            "Server={cluster_id}.cluster.example.com;EnableClusterFailover=1"
        )),
        factory,
        selector: Arc::new(RandomSelector::new()),
        host_pattern: Some("?.cluster.example.com".to_string()),
        ignore_topology_request: Duration::from_millis(50),
        high_refresh_rate: Duration::from_millis(30),
        refresh_rate: Duration::from_secs(30),
        failover_timeout: Duration::from_millis(600),
    }
}

/// Scenario: cold start against a healthy cluster publishes the exact topology the cluster
/// endpoint's bootstrap query reports.
#[tokio::test]
async fn cold_start_healthy_cluster() {
    init_tracing();
    let cluster_endpoint = "clusterA.cluster.example.com";
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![(
        cluster_endpoint,
        HostScript::writer(topology_rows("w1", &["r1", "r2"])),
    )]));

    let registry = ClusterServiceRegistry::new();
    let cluster_id = registry.start_failover_service(start_options("clusterA", factory)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    let topology = registry.cache().get(&cluster_id).await.unwrap();
    assert_eq!(topology.len(), 3);
    assert_eq!(
        rds_cluster_failover::host::writer_of(&topology).unwrap().host(),
        "w1.cluster.example.com"
    );

    registry.stop_failover_service(&cluster_id).await;
}

/// Scenario: `READER_OR_WRITER` degrades to the original writer once the only reader is
/// unreachable.
#[tokio::test]
async fn reader_failover_degrades_to_original_writer() {
    init_tracing();
    let cluster_endpoint = "clusterB.cluster.example.com";
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![
        (cluster_endpoint, HostScript::writer(topology_rows("w1", &["r1"]))),
        ("w1.cluster.example.com", HostScript::writer(topology_rows("w1", &["r1"]))),
        ("r1.cluster.example.com", HostScript::unreachable()),
    ]));

    let registry = ClusterServiceRegistry::new();
    let cluster_id = registry.start_failover_service(start_options("clusterB", factory)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = registry
        .failover_connection(
            &cluster_id,
            "08S01",
            cluster_endpoint,
            Some(FailoverMode::ReaderOrWriter),
            &Properties::new(),
        )
        .await;
    assert!(matches!(result, FailoverResult::Succeeded(_)), "expected the writer fallback to succeed");
    assert_eq!(
        registry.current_host(&cluster_id).await.unwrap().host(),
        "w1.cluster.example.com"
    );

    registry.stop_failover_service(&cluster_id).await;
}

/// Scenario: with no readers in the cached topology, `STRICT_READER` fails without ever
/// attempting the writer.
#[tokio::test]
async fn strict_reader_with_no_readers_fails_fast() {
    init_tracing();
    let cluster_endpoint = "clusterC.cluster.example.com";
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![(
        cluster_endpoint,
        HostScript::writer(topology_rows("w1", &[])),
    )]));

    let registry = ClusterServiceRegistry::new();
    let cluster_id = registry.start_failover_service(start_options("clusterC", factory)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = registry
        .failover_connection(
            &cluster_id,
            "08S01",
            cluster_endpoint,
            Some(FailoverMode::StrictReader),
            &Properties::new(),
        )
        .await;
    assert!(matches!(result, FailoverResult::Failed));

    registry.stop_failover_service(&cluster_id).await;
}

/// Scenario: a writer failover against a healthy two-reader cluster reconnects to the writer
/// and confirms its role before accepting it.
#[tokio::test]
async fn writer_failover_reconnects_to_writer() {
    init_tracing();
    let cluster_endpoint = "clusterF.cluster.example.com";
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![
        (cluster_endpoint, HostScript::writer(topology_rows("w1", &["r1", "r2"]))),
        ("w1.cluster.example.com", HostScript::writer(topology_rows("w1", &["r1", "r2"]))),
        ("r1.cluster.example.com", HostScript::reader()),
        ("r2.cluster.example.com", HostScript::reader()),
    ]));

    let registry = ClusterServiceRegistry::new();
    let cluster_id = registry.start_failover_service(start_options("clusterF", factory)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let result = registry
        .failover_connection(&cluster_id, "08S01", cluster_endpoint, Some(FailoverMode::StrictWriter), &Properties::new())
        .await;
    assert!(matches!(result, FailoverResult::Succeeded(_)));
    assert_eq!(
        registry.current_host(&cluster_id).await.unwrap().host(),
        "w1.cluster.example.com"
    );

    registry.stop_failover_service(&cluster_id).await;
}

/// Only a SQL state in the `"08"` class triggers anything beyond `Skipped`; the registry lookup
/// never even runs.
#[tokio::test]
async fn non_communication_sql_state_is_skipped() {
    init_tracing();
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![]));
    let registry = ClusterServiceRegistry::new();
    let cluster_id = registry.start_failover_service(start_options("clusterD", factory)).await.unwrap();

    let result = registry
        .failover_connection(
            &cluster_id,
            "42000",
            "clusterD.cluster.example.com",
            Some(FailoverMode::StrictWriter),
            &Properties::new(),
        )
        .await;
    assert!(matches!(result, FailoverResult::Skipped));

    registry.stop_failover_service(&cluster_id).await;
}

/// A second `start_failover_service` call for the same cluster attaches rather than spawning a
/// second monitor; the service only tears down once every matching `stop_failover_service` call
/// has landed.
#[tokio::test]
async fn starting_twice_shares_one_monitor() {
    init_tracing();
    let factory: Arc<dyn SessionFactory> = Arc::new(ScriptedFactory::new(vec![]));
    let registry = ClusterServiceRegistry::new();
    let id1 = registry.start_failover_service(start_options("clusterE", factory.clone())).await.unwrap();
    let id2 = registry.start_failover_service(start_options("clusterE", factory)).await.unwrap();
    assert_eq!(id1, id2);

    registry.stop_failover_service(&id1).await;
    // Still attached by the second start() call; a lookup against the cluster id must not panic
    // or behave as though the service were already torn down.
    let result = registry
        .failover_connection(&id1, "08S01", "clusterE.cluster.example.com", Some(FailoverMode::StrictWriter), &Properties::new())
        .await;
    assert!(matches!(result, FailoverResult::Failed | FailoverResult::Succeeded(_)));

    registry.stop_failover_service(&id1).await;
}
