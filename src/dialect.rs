//! A static provider of the five queries and default port a topology query needs.
//!
//! The dialect is treated as a fixed collaborator (spec §1): it supplies SQL text and a port,
//! nothing else. This crate ships one concrete implementation grounded on the Aurora
//! PostgreSQL dialect of the original C++ driver.

/// Supplies the queries and default port a [`crate::topology::query::QueryHelper`] needs.
pub trait Dialect: Send + Sync + 'static {
    fn default_port(&self) -> u16;
    fn topology_query(&self) -> &str;
    fn writer_id_query(&self) -> &str;
    fn node_id_query(&self) -> &str;
    fn is_reader_query(&self) -> &str;
}

/// The Aurora PostgreSQL dialect: `aurora_replica_status()` plus the instance-identifier and
/// recovery-mode probes.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuroraPostgresDialect;

impl Dialect for AuroraPostgresDialect {
    fn default_port(&self) -> u16 {
        5432
    }

    fn topology_query(&self) -> &str {
        "SELECT SERVER_ID, CASE WHEN SESSION_ID = 'MASTER_SESSION_ID' THEN TRUE ELSE FALSE END, \
         CPU, COALESCE(REPLICA_LAG_IN_MSEC, 0), LAST_UPDATE_TIMESTAMP \
         FROM aurora_replica_status() \
         WHERE EXTRACT(EPOCH FROM(NOW() - LAST_UPDATE_TIMESTAMP)) <= 300 \
         OR SESSION_ID = 'MASTER_SESSION_ID' OR LAST_UPDATE_TIMESTAMP IS NULL"
    }

    fn writer_id_query(&self) -> &str {
        "SELECT SERVER_ID FROM aurora_replica_status() \
         WHERE SESSION_ID = 'MASTER_SESSION_ID' AND SERVER_ID = aurora_db_instance_identifier()"
    }

    fn node_id_query(&self) -> &str {
        "SELECT aurora_db_instance_identifier()"
    }

    fn is_reader_query(&self) -> &str {
        "SELECT pg_is_in_recovery()"
    }
}
