//! Background worker maintaining one limitless cluster's router list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::query::query_routers;
use crate::host::Host;
use crate::monitor::SessionFactory;
use crate::session::DbSession;

/// Default polling interval for the router list.
pub(super) const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Spawns the worker and returns its handle and a stop flag. The worker connects and
/// populates `routers` once immediately — a freshly created monitor shouldn't make its first
/// caller wait a full interval — then repeats on `interval` until stopped.
pub(super) fn spawn(
    factory: Arc<dyn SessionFactory>,
    connection_string: String,
    port: u16,
    interval: Duration,
    routers: Arc<Mutex<Vec<Host>>>,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let stop = Arc::new(AtomicBool::new(false));
    let handle = tokio::spawn(run(factory, connection_string, port, interval, routers, stop.clone()));
    (handle, stop)
}

async fn run(
    factory: Arc<dyn SessionFactory>,
    connection_string: String,
    port: u16,
    interval: Duration,
    routers: Arc<Mutex<Vec<Host>>>,
    stop: Arc<AtomicBool>,
) {
    let mut session = connect(factory.as_ref(), &connection_string).await;
    if let Some(session) = session.as_mut() {
        refresh(session.as_mut(), port, &routers).await;
    }

    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(interval).await;
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if session.is_none() || !session.as_mut().unwrap().ping().await {
            session = connect(factory.as_ref(), &connection_string).await;
        }

        match session.as_mut() {
            Some(s) => refresh(s.as_mut(), port, &routers).await,
            None => warn!("limitless router monitor: reconnect failed, retrying next interval"),
        }
    }

    if let Some(mut s) = session {
        s.close().await;
    }
    info!("limitless router monitor stopped");
}

async fn connect(factory: &dyn SessionFactory, connection_string: &str) -> Option<Box<dyn DbSession>> {
    let mut session = factory.new_session().await.ok()?;
    session.connect(connection_string).await.ok()?;
    Some(session)
}

async fn refresh(session: &mut dyn DbSession, port: u16, routers: &Mutex<Vec<Host>>) {
    let fresh = query_routers(session, port).await;
    if fresh.is_empty() {
        debug!("limitless router query returned no rows, keeping previous list");
        return;
    }
    *routers.lock().await = fresh;
}
