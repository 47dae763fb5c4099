//! Job lifecycle around the scrape engine.
//!
//! Requests are validated and pushed onto a per-resource-type
//! [`queue`](crate::queue); a [`ScrapeWorker`] owning one browser session
//! drains each queue and writes every response into the shared
//! [`ResultCache`], from which clients poll by job id. [`SyncScraper`] covers
//! the request/response variant that bypasses the queues.

pub mod cache;
pub mod error;
pub mod queue;
pub mod service;
pub mod worker;

pub use {
    cache::{CacheKey, ResultCache},
    error::{Error, Result},
    queue::{QueueReceiver, QueueSender, QueuedJob, request_queue},
    service::{JobService, SyncScraper},
    worker::{ScrapeWorker, WorkerSettings, WorkerState},
};
