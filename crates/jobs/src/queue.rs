//! FIFO of pending scrape jobs, one per resource type.
//!
//! Any number of [`QueueSender`] clones may enqueue; the single
//! [`QueueReceiver`] is owned by the worker, so there is exactly one consumer.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use {
    tokio::{
        sync::{Notify, mpsc},
        time::{self, Duration, Instant},
    },
    tokio_util::sync::CancellationToken,
    trawl_browser::{ResourceType, ScrapeRequest},
    trawl_common::JobId,
};

use crate::error::{Error, Result};

/// A request waiting for a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub request: ScrapeRequest,
    pub enqueued_at: Instant,
}

impl QueuedJob {
    pub fn new(job_id: JobId, request: ScrapeRequest) -> Self {
        Self {
            job_id,
            request,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct Shared {
    resource_type: ResourceType,
    depth: AtomicUsize,
    /// 0 = unbounded.
    max_depth: usize,
    notify: Notify,
}

/// Create a queue. `max_depth` of 0 means unbounded.
pub fn request_queue(
    resource_type: ResourceType,
    max_depth: usize,
) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        resource_type,
        depth: AtomicUsize::new(0),
        max_depth,
        notify: Notify::new(),
    });
    (
        QueueSender {
            tx,
            shared: Arc::clone(&shared),
        },
        QueueReceiver { rx, shared },
    )
}

#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<QueuedJob>,
    shared: Arc<Shared>,
}

impl QueueSender {
    /// Append `job`. Never blocks; fails only when the queue is bounded and
    /// full, or the worker is gone.
    pub fn enqueue(&self, job: QueuedJob) -> Result<()> {
        let shared = &self.shared;
        if shared.max_depth > 0 {
            shared
                .depth
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                    (d < shared.max_depth).then_some(d + 1)
                })
                .map_err(|depth| Error::QueueFull {
                    resource_type: shared.resource_type,
                    depth,
                })?;
        } else {
            shared.depth.fetch_add(1, Ordering::AcqRel);
        }

        if self.tx.send(job).is_err() {
            shared.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::QueueClosed {
                resource_type: shared.resource_type,
            });
        }
        shared.notify.notify_one();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resource_type(&self) -> ResourceType {
        self.shared.resource_type
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueuedJob>,
    shared: Arc<Shared>,
}

impl QueueReceiver {
    /// Take the oldest job, or `None` right away if there is none.
    pub fn try_dequeue(&mut self) -> Option<QueuedJob> {
        let job = self.rx.try_recv().ok()?;
        self.shared.depth.fetch_sub(1, Ordering::AcqRel);
        Some(job)
    }

    /// Wait until something is enqueued, `poll_interval` passes or `cancel`
    /// fires, whichever comes first.
    pub async fn wait(&self, poll_interval: Duration, cancel: &CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => {},
            () = self.shared.notify.notified() => {},
            () = time::sleep(poll_interval) => {},
        }
    }

    pub fn len(&self) -> usize {
        self.shared.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resource_type(&self) -> ResourceType {
        self.shared.resource_type
    }
}
