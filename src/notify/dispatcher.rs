//! Asynchronous alert dispatch.
//!
//! One worker thread owns the `Notifier` and drains a bounded queue. The
//! processing loop only ever calls `dispatch`, which never blocks: when the
//! queue is full the alert is dropped and counted. `shutdown` closes the
//! queue and gives the worker a bounded amount of time to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};

use super::Notifier;
use crate::alert::Alert;

pub const DISPATCH_QUEUE_DEPTH: usize = 16;

/// Delivery counters, snapshotted at shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
    /// Rejected because the queue was full or already closed.
    pub dropped: u64,
    /// False when the worker was abandoned with alerts possibly in flight.
    pub drained: bool,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self, drained: bool) -> DispatchStats {
        DispatchStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            drained,
        }
    }
}

pub struct NotificationDispatcher {
    tx: Option<Sender<Alert>>,
    counters: Arc<Counters>,
    join: Option<JoinHandle<()>>,
    transport: &'static str,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Box<dyn Notifier>) -> Self {
        Self::with_capacity(notifier, DISPATCH_QUEUE_DEPTH)
    }

    pub fn with_capacity(mut notifier: Box<dyn Notifier>, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded::<Alert>(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();
        let transport = notifier.name();

        let join = std::thread::spawn(move || {
            for alert in rx.iter() {
                match notifier.notify(&alert) {
                    Ok(()) => {
                        worker_counters.sent.fetch_add(1, Ordering::Relaxed);
                        log::info!(
                            "alert #{} delivered via {}",
                            alert.ordinal,
                            notifier.name()
                        );
                    }
                    Err(err) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        log::warn!("alert delivery via {} failed: {:#}", notifier.name(), err);
                    }
                }
            }
        });

        Self {
            tx: Some(tx),
            counters,
            join: Some(join),
            transport,
        }
    }

    pub fn transport(&self) -> &'static str {
        self.transport
    }

    /// Queue an alert without blocking. Returns `false` if it was dropped.
    pub fn dispatch(&self, alert: Alert) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        match tx.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(alert)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "notification queue full; alert #{} for {} dropped",
                    alert.ordinal,
                    alert.context
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("notification worker gone; alert dropped");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot(false)
    }

    /// Close the queue and wait up to `timeout` for queued alerts to go out.
    pub fn shutdown(mut self, timeout: Duration) -> DispatchStats {
        self.tx.take();
        let Some(join) = self.join.take() else {
            return self.counters.snapshot(true);
        };

        let deadline = Instant::now().checked_add(timeout);
        while !join.is_finished() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                log::warn!(
                    "notification worker still busy after {:?}; abandoning pending alerts",
                    timeout
                );
                return self.counters.snapshot(false);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if join.join().is_err() {
            log::error!("notification worker panicked");
            return self.counters.snapshot(false);
        }
        self.counters.snapshot(true)
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        // Closing the queue lets a detached worker exit once it is done.
        self.tx.take();
    }
}
