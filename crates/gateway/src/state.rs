use std::sync::Arc;

use {
    tokio_util::sync::CancellationToken,
    trawl_jobs::{JobService, SyncScraper},
};

/// Shared state behind every handler.
pub struct GatewayState {
    pub version: String,
    pub service_name: String,
    pub jobs: Arc<JobService>,
    /// `None` when synchronous scraping is disabled.
    pub sync: Option<Arc<SyncScraper>>,
    /// Cancelled on shutdown; in-flight synchronous scrapes observe it.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        service_name: impl Into<String>,
        jobs: Arc<JobService>,
        sync: Option<Arc<SyncScraper>>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            service_name: service_name.into(),
            jobs,
            sync,
            shutdown,
        })
    }
}
