//! State shared between a monitor's main worker and its node probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::host::{Host, Topology};
use crate::session::DbSession;

/// The monitor's current mode. Entry is always [`Mode::Panic`]; a monitor starts with no
/// writer-verified session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Regular,
    Panic,
}

pub(super) struct SharedState {
    pub main_session: Mutex<Option<Box<dyn DbSession>>>,
    pub is_writer_connection: AtomicBool,
    pub writer_host: Mutex<Option<Host>>,

    /// Set by whichever probe first confirms a writer, before any other probe may claim it.
    pub writer_claimed: AtomicBool,
    /// The session a probe donates once it claims the writer slot; adopted by the main worker
    /// on its next iteration and never touched again by the probe that donated it.
    pub donated_writer_session: Mutex<Option<Box<dyn DbSession>>>,

    /// Whether a reader probe has already taken on publishing topology this panic round.
    pub topology_updater_claimed: AtomicBool,

    pub request_update_topology: AtomicBool,
    pub request_update_notify: Notify,
    pub topology_updated: Notify,

    pub ignore_window_until: Mutex<Option<Instant>>,

    pub stop_probes: AtomicBool,
    pub is_running: AtomicBool,

    pub known_hosts: Mutex<Vec<Host>>,
    pub latest_probe_topology: Mutex<Option<Topology>>,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            main_session: Mutex::new(None),
            is_writer_connection: AtomicBool::new(false),
            writer_host: Mutex::new(None),
            writer_claimed: AtomicBool::new(false),
            donated_writer_session: Mutex::new(None),
            topology_updater_claimed: AtomicBool::new(false),
            request_update_topology: AtomicBool::new(false),
            request_update_notify: Notify::new(),
            topology_updated: Notify::new(),
            ignore_window_until: Mutex::new(None),
            stop_probes: AtomicBool::new(false),
            is_running: AtomicBool::new(true),
            known_hosts: Mutex::new(Vec::new()),
            latest_probe_topology: Mutex::new(None),
        }
    }

    /// Resets the per-round claim flags before spawning a fresh probe pool.
    pub fn reset_panic_round(&self) {
        self.writer_claimed.store(false, Ordering::SeqCst);
        self.topology_updater_claimed.store(false, Ordering::SeqCst);
        self.stop_probes.store(false, Ordering::SeqCst);
    }

    /// Arms the ignore-new-requests window only if it isn't already armed. The source system
    /// does this with a compare-and-exchange from an epoch sentinel so only the first writer
    /// verification in a round can (re)arm it; an `Option` collapses that to "set only if
    /// `None`".
    pub async fn arm_ignore_window(&self, duration: Duration) {
        let mut guard = self.ignore_window_until.lock().await;
        if guard.is_none() {
            *guard = Some(Instant::now() + duration);
        }
    }

    /// Reports whether the window is still active, clearing it if it has elapsed.
    pub async fn ignore_window_active(&self) -> bool {
        let mut guard = self.ignore_window_until.lock().await;
        match *guard {
            Some(deadline) if deadline > Instant::now() => true,
            Some(_) => {
                *guard = None;
                false
            }
            None => false,
        }
    }

    pub fn request_update(&self) {
        self.request_update_topology.store(true, Ordering::SeqCst);
        self.request_update_notify.notify_waiters();
    }
}
