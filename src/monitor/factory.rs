//! The collaborator a monitor uses to open database sessions.

use async_trait::async_trait;

use crate::session::DbSession;
use crate::Result;

/// Produces [`DbSession`]s for a monitor's main worker and node probes.
///
/// `acquire_environment` models the one-time environment/driver-manager handle allocation the
/// source system performs at monitor construction; its failure is fatal (`Construction` error)
/// and the monitor is never started.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    async fn acquire_environment(&self) -> Result<()>;
    async fn new_session(&self) -> Result<Box<dyn DbSession>>;
}
