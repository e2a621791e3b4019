//! Fixed queries for the stateless, sharded "limitless" router-endpoint variant.
//!
//! Independent of [`crate::topology::QueryHelper`] and the `Dialect` trait: the catalog probe
//! and router query are fixed strings, not dialect-provided — this subsystem ships its own
//! queries rather than delegating to a dialect.

use crate::host::{Host, HostState};
use crate::session::DbSession;

/// Probes whether a cluster's catalog carries the `rds_aurora.limitless_subclusters` table,
/// i.e. whether it is a limitless (sharded) cluster at all.
pub(super) const CHECK_LIMITLESS_CLUSTER_QUERY: &str = "SELECT EXISTS ( SELECT 1 FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid WHERE c.relname = 'limitless_subclusters' AND n.nspname = 'rds_aurora');";

/// Lists every router endpoint and its current load.
pub(super) const LIMITLESS_ROUTER_QUERY: &str = "SELECT router_endpoint, load FROM aurora_limitless_router_endpoints()";

/// Weight bounds for the router load-to-weight mapping below. Unlike the topology query's
/// weight formula, these bounds aren't given numeric values anywhere the rest of the formula
/// is specified; 1..=10 is the range the formula's own shape (`round(10*(1-load))` for `load`
/// in `[0,1]`) naturally produces, and is the value documented as the resolved choice in
/// DESIGN.md.
pub(super) const MIN_WEIGHT: u32 = 1;
pub(super) const MAX_WEIGHT: u32 = 10;
const WEIGHT_SCALING: f64 = 10.0;

/// Runs the catalog probe against an already-connected session.
pub(super) async fn check_limitless_cluster(session: &mut dyn DbSession) -> bool {
    let rows = match session.execute(CHECK_LIMITLESS_CLUSTER_QUERY).await {
        Ok(rows) => rows,
        Err(_) => return false,
    };
    rows.first()
        .and_then(|row| row.first())
        .and_then(|col| col.clone())
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("f") && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Runs the router-endpoint query and materializes one writer-labeled [`Host`] per row
/// (routers are addressable like writers, per the round-robin selector's `want_writer`
/// contract). Returns an empty list on any failure; an empty result is the caller's signal to
/// treat this as a transient error and keep the previous list rather than overwrite it.
pub(super) async fn query_routers(session: &mut dyn DbSession, port: u16) -> Vec<Host> {
    let rows = match session.execute(LIMITLESS_ROUTER_QUERY).await {
        Ok(rows) => rows,
        Err(_) => return Vec::new(),
    };
    rows.into_iter().filter_map(|row| row_to_router(&row, port)).collect()
}

fn row_to_router(row: &[Option<String>], port: u16) -> Option<Host> {
    let endpoint = row.first()?.clone()?;
    let load: f64 = row
        .get(1)
        .and_then(|v| v.as_deref())
        .and_then(|v| v.parse().ok())
        .unwrap_or(f64::NAN);
    Some(Host {
        state: HostState::Up,
        is_writer: true,
        weight: load_to_weight(load),
        last_update_timestamp: None,
        ..Host::new(endpoint, port)
    })
}

fn load_to_weight(load: f64) -> u32 {
    let raw = (WEIGHT_SCALING - load * WEIGHT_SCALING).round();
    if !raw.is_finite() || raw < MIN_WEIGHT as f64 || raw > MAX_WEIGHT as f64 {
        MIN_WEIGHT
    } else {
        raw as u32
    }
}
