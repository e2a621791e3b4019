//! Topology data model and the query helper that materializes it from a [`DbSession`].

pub mod query;

pub use query::QueryHelper;
