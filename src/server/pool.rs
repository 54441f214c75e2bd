//! Fixed-size session worker pool
//!
//! N workers consume accepted connections from a bounded channel of
//! capacity N. Submission never blocks: a full or shut-down pool
//! hands the connection straight back so the dispatcher can queue or
//! refuse it. Each session runs in its own task whose join handle the
//! worker awaits, so a panicking session is logged and the worker
//! keeps serving.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::GateMetrics;

use super::conn::Connection;

/// Runs one admitted connection to completion
pub trait SessionHandler: Send + Sync + 'static {
    fn handle(self: Arc<Self>, conn: Connection) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Pool of session workers over a bounded task channel
pub struct WorkerPool {
    sender: parking_lot::Mutex<Option<mpsc::Sender<Connection>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
    capacity: usize,
    metrics: Arc<GateMetrics>,
}

impl WorkerPool {
    /// Start `workers` workers; the task channel gets the same capacity
    pub fn new(
        workers: usize,
        handler: Arc<dyn SessionHandler>,
        metrics: Arc<GateMetrics>,
    ) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel(workers);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        metrics.pool_size.store(workers as u64, Ordering::Relaxed);

        let handles = (0..workers)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                tokio::spawn(worker_loop(worker_id, receiver, handler))
            })
            .collect();

        Self {
            sender: parking_lot::Mutex::new(Some(sender)),
            workers: parking_lot::Mutex::new(handles),
            shutdown: AtomicBool::new(false),
            capacity: workers,
            metrics,
        }
    }

    /// Non-blocking submit
    ///
    /// Hands the connection back when the channel is full or the pool
    /// is shutting down.
    pub fn submit(&self, conn: Connection) -> Result<(), Connection> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(conn);
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(conn);
        };

        match sender.try_send(conn) {
            Ok(()) => {
                let depth = self.capacity - sender.capacity();
                self.metrics
                    .pool_queue_depth
                    .store(depth as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(conn)) => {
                warn!(conn_id = conn.id(), "worker pool is full, connection rejected");
                Err(conn)
            }
            Err(TrySendError::Closed(conn)) => Err(conn),
        }
    }

    /// Workers currently configured
    pub fn size(&self) -> usize {
        self.capacity
    }

    /// Stop intake and wait for every worker to drain and finish
    ///
    /// Idempotent; subsequent [`WorkerPool::submit`] calls fail.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);

        // dropping the sender closes the channel once drained
        let sender = self.sender.lock().take();
        drop(sender);

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            workers.drain(..).collect()
        };
        for handle in handles {
            if let Err(err) = handle.await {
                error!("worker task failed during shutdown: {err}");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Connection>>>,
    handler: Arc<dyn SessionHandler>,
) {
    loop {
        let conn = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };

        let Some(conn) = conn else {
            // channel closed and drained
            break;
        };

        let conn_id = conn.id();
        let session = tokio::spawn(Arc::clone(&handler).handle(conn));
        if let Err(err) = session.await {
            if err.is_panic() {
                error!(worker_id, conn_id, "session panicked; worker continues");
            }
        }
    }
    debug!(worker_id, "worker stopped");
}
