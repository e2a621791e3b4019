use std::sync::Arc;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::dialect::Dialect;
use crate::host::{Host, HostState, Topology};
use crate::session::DbSession;

/// Executes the dialect's topology / writer-id queries against a session and materializes
/// [`Host`] records.
///
/// Constructed with a default port, an endpoint template containing exactly one `?`
/// placeholder, and a dialect supplying the query text. Both operations return an empty
/// result on any failure rather than propagating an error: the caller (the topology monitor)
/// treats "no topology" and "query failed" identically.
#[derive(Clone)]
pub struct QueryHelper {
    dialect: Arc<dyn Dialect>,
    endpoint_template: String,
    default_port: u16,
}

impl QueryHelper {
    /// `endpoint_template` must contain exactly one `?`, which is replaced with the node id
    /// returned by the topology query to form each host's connectable address.
    pub fn new(dialect: Arc<dyn Dialect>, endpoint_template: impl Into<String>) -> Self {
        let endpoint_template = endpoint_template.into();
        debug_assert_eq!(
            endpoint_template.matches('?').count(),
            1,
            "endpoint template must contain exactly one '?' placeholder"
        );
        let default_port = dialect.default_port();
        Self {
            dialect,
            endpoint_template,
            default_port,
        }
    }

    /// Runs the writer-id query and returns the resulting identifier, or an empty string on
    /// any failure (including an empty result set). A non-empty return means this session was
    /// attached to the current writer at query time.
    pub async fn get_writer_id(&self, session: &mut dyn DbSession) -> String {
        let rows = match session.execute(self.dialect.writer_id_query()).await {
            Ok(rows) => rows,
            Err(_) => return String::new(),
        };
        rows.first()
            .and_then(|row| row.first())
            .and_then(|col| col.clone())
            .unwrap_or_default()
    }

    /// Runs the is-reader role-check query; returns `None` on any failure (including an empty
    /// result), meaning the caller cannot establish this session's role.
    pub async fn is_reader(&self, session: &mut dyn DbSession) -> Option<bool> {
        let rows = session.execute(self.dialect.is_reader_query()).await.ok()?;
        let value = rows.first()?.first()?.clone()?;
        Some(value != "0" && !value.eq_ignore_ascii_case("f") && !value.eq_ignore_ascii_case("false"))
    }

    /// Runs the topology query and materializes one [`Host`] per row, or an empty list on any
    /// failure.
    pub async fn query_topology(&self, session: &mut dyn DbSession) -> Topology {
        let rows = match session.execute(self.dialect.topology_query()).await {
            Ok(rows) => rows,
            Err(_) => return Vec::new(),
        };

        rows.into_iter().filter_map(|row| self.row_to_host(&row)).collect()
    }

    fn row_to_host(&self, row: &[Option<String>]) -> Option<Host> {
        let node_id = row.first()?.clone()?;
        let is_writer = row
            .get(1)
            .and_then(|v| v.as_deref())
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("f") && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(false);
        let cpu_usage: f64 = row
            .get(2)
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let replica_lag_ms: f64 = row
            .get(3)
            .and_then(|v| v.as_deref())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        let last_update_timestamp = row
            .get(4)
            .and_then(|v| v.as_deref())
            .and_then(|v| OffsetDateTime::parse(v, &Rfc3339).ok());

        let weight = (replica_lag_ms.round() as i64 * 100 + cpu_usage.round() as i64).max(0) as u32;
        let endpoint = self.endpoint_template.replacen('?', &node_id, 1);

        Some(Host {
            state: HostState::Up,
            is_writer,
            weight,
            last_update_timestamp,
            ..Host::new(endpoint, self.default_port)
        })
    }
}
