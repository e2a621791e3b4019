//! Discovery and weighted load-balancing of stateless router endpoints for the "limitless"
//! (sharded) cluster variant: an independent subsystem from the writer/reader topology monitor,
//! sharing only the selector layer (component E) and the same `DbSession`/`SessionFactory`
//! collaborators.

mod monitor;
mod query;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::host::Host;
use crate::monitor::SessionFactory;
use crate::selector::{set_round_robin_weight, HostSelector, Properties, RoundRobinSelector};
use crate::session::DbSession;

pub use query::{check_limitless_cluster, MAX_WEIGHT, MIN_WEIGHT};

struct LimitlessMonitorEntry {
    reference_count: AtomicUsize,
    routers: Arc<Mutex<Vec<Host>>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide `service_id → LimitlessMonitorEntry` map, mirroring [`crate::registry`]'s
/// ref-counted per-cluster lifecycle but for the router-discovery worker.
pub struct LimitlessServiceRegistry {
    services: Mutex<HashMap<String, Arc<LimitlessMonitorEntry>>>,
    selector: RoundRobinSelector,
}

impl Default for LimitlessServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitlessServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            selector: RoundRobinSelector::new(),
        }
    }

    /// Looks up or creates the monitor for `service_id` (incrementing its reference count, or
    /// starting a fresh background worker on first use), copies its current router list, and
    /// selects one via round-robin weighted by reported load. Returns `None` if the router list
    /// is still empty (e.g. the worker hasn't completed its first query yet).
    pub async fn get_limitless_instance(
        &self,
        connection_string: &str,
        port: u16,
        service_id: &str,
        factory: Arc<dyn SessionFactory>,
    ) -> Option<Host> {
        self.get_limitless_instance_with_interval(
            connection_string,
            port,
            service_id,
            factory,
            monitor::DEFAULT_INTERVAL,
        )
        .await
    }

    /// As [`Self::get_limitless_instance`] but with an explicit poll interval; split out so
    /// tests can drive the worker on a fast cadence without waiting a full second.
    pub async fn get_limitless_instance_with_interval(
        &self,
        connection_string: &str,
        port: u16,
        service_id: &str,
        factory: Arc<dyn SessionFactory>,
        interval: Duration,
    ) -> Option<Host> {
        let entry = {
            let mut services = self.services.lock().await;
            if let Some(entry) = services.get(service_id) {
                entry.reference_count.fetch_add(1, Ordering::SeqCst);
                entry.clone()
            } else {
                let routers = Arc::new(Mutex::new(Vec::new()));
                let (worker, stop) =
                    monitor::spawn(factory, connection_string.to_string(), port, interval, routers.clone());
                let entry = Arc::new(LimitlessMonitorEntry {
                    reference_count: AtomicUsize::new(1),
                    routers,
                    stop,
                    worker: Mutex::new(Some(worker)),
                });
                info!(service_id, "started limitless router monitor");
                services.insert(service_id.to_string(), entry.clone());
                entry
            }
        };

        let routers = entry.routers.lock().await.clone();
        if routers.is_empty() {
            return None;
        }

        let mut properties = Properties::new();
        set_round_robin_weight(&routers, &mut properties);
        self.selector.select(&routers, true, &properties).await.ok()
    }

    /// Decrements the reference count for `service_id`; on reaching zero, stops and joins the
    /// background worker and removes the entry.
    pub async fn stop_limitless_monitor_service(&self, service_id: &str) {
        let retired = {
            let mut services = self.services.lock().await;
            let Some(entry) = services.get(service_id) else {
                return;
            };
            if entry.reference_count.load(Ordering::SeqCst) > 0 {
                entry.reference_count.fetch_sub(1, Ordering::SeqCst);
            }
            if entry.reference_count.load(Ordering::SeqCst) == 0 {
                services.remove(service_id)
            } else {
                None
            }
        };

        if let Some(entry) = retired {
            entry.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = entry.worker.lock().await.take() {
                let _ = handle.await;
            }
            info!(service_id, "stopped limitless router monitor");
        }
    }

    #[cfg(test)]
    async fn reference_count(&self, service_id: &str) -> Option<usize> {
        self.services
            .lock()
            .await
            .get(service_id)
            .map(|e| e.reference_count.load(Ordering::SeqCst))
    }

    #[cfg(test)]
    async fn contains(&self, service_id: &str) -> bool {
        self.services.lock().await.contains_key(service_id)
    }
}

static GLOBAL: Lazy<LimitlessServiceRegistry> = Lazy::new(LimitlessServiceRegistry::new);

/// The process-wide [`LimitlessServiceRegistry`] singleton.
pub fn global() -> &'static LimitlessServiceRegistry {
    &GLOBAL
}
