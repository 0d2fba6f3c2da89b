//! Periodic reconciliation of the live-process table.
//!
//! A background thread polls `is_running` for every tracked service; the
//! call itself performs the cleanup and error recording, so the monitor's
//! only extra job is noticing was-running-now-stopped transitions and
//! emitting an event so a consumer refreshes only when something changed.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender, channel},
    },
    thread,
    time::Duration,
};
use tracing::{debug, info};

use crate::{constants::MONITOR_INTERVAL, supervisor::Supervisor};

/// External state change observed by a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// A tracked process was found dead outside the supervisor's own stop.
    Exited {
        /// Service name whose process ended.
        name: String,
    },
}

/// Handle to the reconciliation thread.
pub struct Monitor {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Monitor {
    /// Spawns the reconciliation loop at the default interval.
    pub fn spawn(supervisor: Arc<Supervisor>) -> (Self, Receiver<ServiceEvent>) {
        Self::spawn_with_interval(supervisor, MONITOR_INTERVAL)
    }

    /// Spawns the reconciliation loop with an explicit interval.
    pub fn spawn_with_interval(
        supervisor: Arc<Supervisor>,
        interval: Duration,
    ) -> (Self, Receiver<ServiceEvent>) {
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = channel();

        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            debug!("Reconciliation loop started");
            while flag.load(Ordering::SeqCst) {
                Self::reconcile_once(&supervisor, &tx);
                Self::sleep_interruptibly(&flag, interval);
            }
            debug!("Reconciliation loop terminating");
        });

        (
            Self {
                running,
                handle: Some(handle),
            },
            rx,
        )
    }

    fn reconcile_once(supervisor: &Supervisor, tx: &Sender<ServiceEvent>) {
        Self::reconcile_names(supervisor.tracked(), supervisor, tx);
    }

    /// Checks each name from a snapshot of the live-process table. A name
    /// stopped by the supervisor between the snapshot and the check reports
    /// not-running with no error recorded; only a dead-process
    /// reconciliation, which records an unexpected-exit error, is an event.
    fn reconcile_names(
        names: Vec<String>,
        supervisor: &Supervisor,
        tx: &Sender<ServiceEvent>,
    ) {
        for name in names {
            if !supervisor.is_running(&name) && supervisor.get_error(&name).is_some() {
                info!("Reconciliation found service '{name}' no longer running");
                let _ = tx.send(ServiceEvent::Exited { name });
            }
        }
    }

    /// Sleeps in short slices so shutdown is prompt even with long intervals.
    fn sleep_interruptibly(flag: &AtomicBool, interval: Duration) {
        let slice = Duration::from_millis(50);
        let mut slept = Duration::ZERO;
        while slept < interval && flag.load(Ordering::SeqCst) {
            thread::sleep(slice);
            slept += slice;
        }
    }

    /// Signals the loop to exit and waits for it to finish.
    pub fn shutdown(mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
