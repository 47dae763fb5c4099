//! Job submission, result lookup and worker lifecycle.

use std::sync::Arc;

use {
    tokio::{
        sync::{Mutex, Semaphore},
        task::JoinHandle,
        time::{self, Duration},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    trawl_browser::{
        BrowserError, BrowserSession, ResourceType, ScrapeRequest, ScrapeResponse, Scraper,
        ScraperConfig, SessionProvider, validate::validate_request,
    },
    trawl_common::JobId,
    trawl_config::TrawlConfig,
};

use crate::{
    cache::ResultCache,
    error::{Error, Result},
    queue::{QueueSender, QueuedJob, request_queue},
    worker::{ScrapeWorker, WorkerSettings},
};

/// Queued scraping: one queue and one worker per resource type, sharing a
/// result cache.
pub struct JobService {
    page_source: QueueSender,
    screenshot: QueueSender,
    cache: ResultCache,
    allowed_domains: Vec<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobService {
    /// Create the queues and spawn the workers and the cache sweeper. Everything
    /// stops when `shutdown` fires.
    pub fn start(
        config: &TrawlConfig,
        provider: Arc<dyn SessionProvider>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let cache = ResultCache::new(Duration::from_secs(config.cache.ttl_secs));
        let scraper = Scraper::new(ScraperConfig::from(config));
        let settings = WorkerSettings::from(&config.worker);
        let max_depth = config.worker.max_queue_depth;

        let mut tasks = Vec::with_capacity(ResourceType::ALL.len() + 1);
        let mut spawn_worker = |resource_type: ResourceType| {
            let (tx, rx) = request_queue(resource_type, max_depth);
            let worker = ScrapeWorker::new(
                Arc::clone(&provider),
                scraper.clone(),
                rx,
                cache.clone(),
                settings,
                shutdown.clone(),
            );
            tasks.push(tokio::spawn(worker.run()));
            tx
        };
        let page_source = spawn_worker(ResourceType::PageSource);
        let screenshot = spawn_worker(ResourceType::Screenshot);

        tasks.push(cache.spawn_sweeper(
            Duration::from_secs(config.cache.sweep_interval_secs),
            shutdown,
        ));

        info!(
            max_queue_depth = max_depth,
            cache_ttl_secs = config.cache.ttl_secs,
            "job service started"
        );

        Arc::new(Self {
            page_source,
            screenshot,
            cache,
            allowed_domains: config.browser.allowed_domains.clone(),
            tasks: Mutex::new(tasks),
        })
    }

    fn queue(&self, resource_type: ResourceType) -> &QueueSender {
        match resource_type {
            ResourceType::PageSource => &self.page_source,
            ResourceType::Screenshot => &self.screenshot,
        }
    }

    /// Validate and enqueue `request`. The returned id is what clients poll
    /// [`Self::result`] with.
    pub fn submit(&self, request: ScrapeRequest) -> Result<JobId> {
        validate_request(&request, &self.allowed_domains)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let job_id = JobId::new();
        let resource_type = request.resource_type;
        self.queue(resource_type)
            .enqueue(QueuedJob::new(job_id, request))?;

        debug!(%job_id, %resource_type, depth = self.queue_depth(resource_type), "job queued");
        Ok(job_id)
    }

    /// The finished response, or `None` while the job is pending or unknown.
    pub fn result(&self, job_id: JobId, resource_type: ResourceType) -> Option<ScrapeResponse> {
        self.cache.try_get(job_id, resource_type)
    }

    pub fn queue_depth(&self, resource_type: ResourceType) -> usize {
        self.queue(resource_type).len()
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Wait for the workers and sweeper to exit after shutdown.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "job service task ended abnormally");
            }
        }
        debug!("job service stopped");
    }
}

/// Scrapes inside the request cycle on a fresh session, with a cap on how
/// many sessions are open at once.
pub struct SyncScraper {
    provider: Arc<dyn SessionProvider>,
    scraper: Scraper,
    permits: Semaphore,
    max_sessions: usize,
    request_timeout: Duration,
}

impl SyncScraper {
    pub fn new(config: &TrawlConfig, provider: Arc<dyn SessionProvider>) -> Self {
        let max_sessions = config.sync.max_concurrent_sessions.max(1);
        Self {
            provider,
            scraper: Scraper::new(ScraperConfig::from(config)),
            permits: Semaphore::new(max_sessions),
            max_sessions,
            request_timeout: Duration::from_millis(config.sync.request_timeout_ms),
        }
    }

    /// Run `request` to completion.
    ///
    /// Session launch failures and scrape failures come back as `Error`
    /// responses; only invalid input and saturation are `Err`.
    pub async fn scrape(
        &self,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<ScrapeResponse> {
        validate_request(request, &self.scraper.config().allowed_domains)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        let _permit = self.permits.try_acquire().map_err(|_| Error::Saturated {
            permits: self.max_sessions,
        })?;

        let job_id = JobId::new();
        let resource_type = request.resource_type;
        let session = match self.provider.open().await {
            Ok(session) => Arc::<dyn BrowserSession>::from(session),
            Err(e) => {
                warn!(%job_id, error = %e, "could not open browser session");
                return Ok(ScrapeResponse::error(job_id, resource_type, e.to_string()));
            },
        };

        let closer = SessionCloser::new(&session);
        let cancel = cancel.child_token();
        let response = match time::timeout(
            self.request_timeout,
            self.scraper.scrape(session.as_ref(), job_id, request, &cancel),
        )
        .await
        {
            Ok(outcome) => outcome.response,
            Err(_) => {
                let e = BrowserError::Timeout(format!(
                    "request did not finish within {}ms",
                    self.request_timeout.as_millis()
                ));
                ScrapeResponse::error(job_id, resource_type, e.to_string())
            },
        };
        closer.close().await;
        Ok(response)
    }
}

/// Closes a request-scoped session, even when the request future is dropped
/// first, e.g. because the client went away.
struct SessionCloser(Option<Arc<dyn BrowserSession>>);

impl SessionCloser {
    fn new(session: &Arc<dyn BrowserSession>) -> Self {
        Self(Some(Arc::clone(session)))
    }

    async fn close(mut self) {
        if let Some(session) = self.0.take() {
            session.close().await;
        }
    }
}

impl Drop for SessionCloser {
    fn drop(&mut self) {
        let Some(session) = self.0.take() else {
            return;
        };
        debug!("request abandoned, closing its browser session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { session.close().await });
            },
            Err(_) => warn!("no runtime to close an abandoned browser session"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        trawl_browser::{
            ScrapeAction, ScrapeStatus,
            testing::{FakeProvider, FakeScript},
        },
    };

    fn config() -> TrawlConfig {
        let mut config = TrawlConfig::default();
        config.worker.poll_interval_ms = 50;
        config.worker.screenshot_settle_ms = 10;
        config
    }

    async fn poll_result(
        service: &JobService,
        job_id: JobId,
        resource_type: ResourceType,
    ) -> ScrapeResponse {
        loop {
            if let Some(resp) = service.result(job_id, resource_type) {
                return resp;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_then_poll() {
        let shutdown = CancellationToken::new();
        let provider = Arc::new(FakeProvider::new(FakeScript::default()));
        let service = JobService::start(&config(), provider.clone(), shutdown.clone());

        let job_id = service
            .submit(ScrapeRequest::new("https://example.com", ResourceType::PageSource))
            .unwrap();
        assert!(service.result(job_id, ResourceType::Screenshot).is_none());

        let resp = poll_result(&service, job_id, ResourceType::PageSource).await;
        assert_eq!(resp.status, ScrapeStatus::Ok);
        assert_eq!(resp.job_id, job_id);
        assert_eq!(service.cached_results(), 1);

        shutdown.cancel();
        service.join().await;
        assert_eq!(provider.opened(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_job_has_no_result() {
        let shutdown = CancellationToken::new();
        let service = JobService::start(
            &config(),
            Arc::new(FakeProvider::new(FakeScript::default())),
            shutdown.clone(),
        );
        assert!(service.result(JobId::new(), ResourceType::PageSource).is_none());
        shutdown.cancel();
        service.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_requests_are_not_queued() {
        let shutdown = CancellationToken::new();
        let service = JobService::start(
            &config(),
            Arc::new(FakeProvider::new(FakeScript::default())),
            shutdown.clone(),
        );

        let err = service
            .submit(ScrapeRequest::new("google.com", ResourceType::PageSource))
            .unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(service.queue_depth(ResourceType::PageSource), 0);

        shutdown.cancel();
        service.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_rejects_submission() {
        let mut config = config();
        config.worker.max_queue_depth = 1;
        let shutdown = CancellationToken::new();
        // Launches keep failing, so nothing is ever dequeued.
        let provider = Arc::new(FakeProvider::new(FakeScript::default()).failing_launches(usize::MAX));
        let service = JobService::start(&config, provider, shutdown.clone());

        let req = ScrapeRequest::new("https://example.com", ResourceType::Screenshot);
        service.submit(req.clone()).unwrap();
        assert!(matches!(
            service.submit(req),
            Err(Error::QueueFull { depth: 1, .. })
        ));

        shutdown.cancel();
        service.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sync_scrape_returns_response_directly() {
        let provider = Arc::new(FakeProvider::new(FakeScript::default().page_source("<b>hi</b>")));
        let sync = SyncScraper::new(&config(), provider.clone());

        let resp = sync
            .scrape(
                &ScrapeRequest::new("https://example.com", ResourceType::PageSource),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(resp.result.as_deref(), Some("<b>hi</b>"));
        assert!(provider.sessions()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_scrape_is_bounded_by_request_timeout() {
        let mut config = config();
        config.sync.request_timeout_ms = 1_000;
        let provider = Arc::new(FakeProvider::new(FakeScript::default()));
        let sync = SyncScraper::new(&config, provider);

        let req = ScrapeRequest::new("https://example.com", ResourceType::PageSource)
            .with_actions(vec![ScrapeAction::Sleep { duration_ms: 5_000 }]);
        let resp = sync.scrape(&req, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.status, ScrapeStatus::Error);
    }

    #[tokio::test]
    async fn sync_launch_failure_is_an_error_response() {
        let provider = Arc::new(FakeProvider::new(FakeScript::default()).failing_launches(1));
        let sync = SyncScraper::new(&config(), provider);
        let resp = sync
            .scrape(
                &ScrapeRequest::new("https://example.com", ResourceType::PageSource),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status, ScrapeStatus::Error);
        assert!(resp.result.unwrap().contains("launch failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_sync_scrape_still_closes_its_session() {
        let provider = Arc::new(FakeProvider::new(
            FakeScript::default().navigate_delay(Duration::from_secs(30)),
        ));
        let sync = SyncScraper::new(&config(), provider.clone());
        let req = ScrapeRequest::new("https://example.com", ResourceType::PageSource);
        let cancel = CancellationToken::new();

        // Dropping the future mid-navigation is what a client disconnect does.
        let abandoned = time::timeout(Duration::from_millis(100), sync.scrape(&req, &cancel)).await;
        assert!(abandoned.is_err());

        let session = provider.sessions().remove(0);
        for _ in 0..10 {
            if session.is_closed() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        assert!(session.is_closed());
        assert_eq!(provider.opened(), 1);
    }
}
