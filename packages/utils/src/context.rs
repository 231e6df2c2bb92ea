use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tokio::sync::broadcast;

const DEFAULT_WORKER_THREADS: usize = 4;

/// Process-wide execution context: the tokio runtime every subsystem
/// spawns onto, plus a shutdown signal that fans out to all of them.
#[derive(Clone)]
pub struct AppContext {
    pub rt: Arc<Runtime>,
    shutdown: Arc<Shutdown>,
}

struct Shutdown {
    requested: AtomicBool,
    tx: broadcast::Sender<()>,
    // parked subscription; without it, a kill() that races ahead of the
    // first real subscriber would land in a closed channel
    _parked: broadcast::Receiver<()>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        Self::with_worker_threads(DEFAULT_WORKER_THREADS)
    }

    pub fn with_worker_threads(worker_threads: usize) -> Self {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .enable_all()
            .build()
            .unwrap();

        let (tx, parked) = broadcast::channel(1);

        Self {
            rt: Arc::new(rt),
            shutdown: Arc::new(Shutdown {
                requested: AtomicBool::new(false),
                tx,
                _parked: parked,
            }),
        }
    }

    /// A fresh subscription to the shutdown signal. Long-running tasks
    /// select on this and wind down when it fires.
    pub fn get_kill_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown.tx.subscribe()
    }

    /// Requests shutdown. Safe to call from signal handlers and tests;
    /// repeated calls after the first are no-ops.
    pub fn kill(&self) {
        if !self.shutdown.requested.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown.tx.send(());
        }
    }

    pub fn killed(&self) -> bool {
        self.shutdown.requested.load(Ordering::SeqCst)
    }
}
