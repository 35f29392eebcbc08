//! Background maintenance queue.
//!
//! Chunk-aggregate re-derivation and embedding retries run off the write
//! path on a single worker thread. The channel is bounded: a full queue
//! makes writers wait, which keeps the eventual-consistency window
//! proportional to queue depth instead of unbounded.

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use tracing::debug;

use crate::types::PlaceId;

/// Work items the store schedules asynchronously.
#[derive(Debug)]
pub enum MaintenanceJob {
    /// Rescan a place's chunks and rebuild its aggregate lexical tier.
    Reaggregate(PlaceId),
    /// Reprocess every row marked `Pending`.
    PendingSweep,
}

enum Envelope {
    Job(MaintenanceJob),
    Barrier(Sender<()>),
    Shutdown,
}

/// Handle to the worker thread. Dropping it shuts the worker down after the
/// jobs already queued have drained.
pub struct MaintenanceQueue {
    tx: Sender<Envelope>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MaintenanceQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaintenanceQueue")
            .field("queued", &self.tx.len())
            .finish_non_exhaustive()
    }
}

impl MaintenanceQueue {
    /// Spawn the worker. `handler` runs every job on the worker thread.
    pub fn start<F>(capacity: usize, handler: F) -> Self
    where
        F: Fn(MaintenanceJob) + Send + 'static,
    {
        let (tx, rx): (Sender<Envelope>, Receiver<Envelope>) = bounded(capacity.max(1));
        let handle = std::thread::spawn(move || {
            for envelope in rx {
                match envelope {
                    Envelope::Job(job) => handler(job),
                    Envelope::Barrier(ack) => {
                        let _ = ack.send(());
                    }
                    Envelope::Shutdown => break,
                }
            }
        });
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a job, blocking while the queue is at capacity. Returns
    /// `false` if the worker has already shut down.
    pub fn submit(&self, job: MaintenanceJob) -> bool {
        match self.tx.send(Envelope::Job(job)) {
            Ok(()) => true,
            Err(e) => {
                debug!("maintenance queue closed, dropping job: {e}");
                false
            }
        }
    }

    /// Block until every job queued before this call has been processed.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = bounded(1);
        if self.tx.send(Envelope::Barrier(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for MaintenanceQueue {
    fn drop(&mut self) {
        let _ = self.tx.send(Envelope::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn jobs_run_on_the_worker_and_flush_waits() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let queue = MaintenanceQueue::start(16, move |job| {
            if matches!(job, MaintenanceJob::Reaggregate(_)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..5 {
            assert!(queue.submit(MaintenanceJob::Reaggregate(PlaceId::new(format!("p{i}")))));
        }
        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn drop_drains_queued_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        {
            let queue = MaintenanceQueue::start(16, move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            queue.submit(MaintenanceJob::PendingSweep);
            queue.submit(MaintenanceJob::PendingSweep);
        }
        // Drop joined the worker; everything queued before shutdown ran.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
