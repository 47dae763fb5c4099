//! Long-lived worker owning one browser session.
//!
//! ```text
//! Starting --open ok--> Active --driver fault--> Faulted --backoff--> Starting
//!    |                                              ^
//!    +--------------------open failed---------------+
//! ```
//!
//! A job whose deadline expires inside a browser call is a driver fault.
//! Jobs that fail because the browser stopped answering are counted, and
//! the session is rebuilt once `max_consecutive_timeouts` happen in a row.

use std::sync::Arc;

use {
    tokio::time::Duration,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    trawl_browser::{
        BrowserSession, ResourceType, Scraper, SessionProvider, executor::pause,
    },
};

use crate::{
    cache::ResultCache,
    queue::{QueueReceiver, QueuedJob},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a session from the provider.
    Starting,
    /// Holding a session and processing jobs.
    Active,
    /// The session broke; it is discarded before a new one is opened.
    Faulted,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Upper bound on an idle wait between queue checks.
    pub poll_interval: Duration,
    /// Pause between a fault and the next session attempt.
    pub restart_backoff: Duration,
    /// Unresponsive jobs in a row that recycle the session.
    pub max_consecutive_timeouts: u32,
}

impl From<&trawl_config::WorkerConfig> for WorkerSettings {
    fn from(cfg: &trawl_config::WorkerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            restart_backoff: Duration::from_millis(cfg.restart_backoff_ms),
            max_consecutive_timeouts: cfg.max_consecutive_timeouts.max(1),
        }
    }
}

pub struct ScrapeWorker {
    provider: Arc<dyn SessionProvider>,
    scraper: Scraper,
    queue: QueueReceiver,
    cache: ResultCache,
    settings: WorkerSettings,
    shutdown: CancellationToken,
    timeouts_in_a_row: u32,
}

impl ScrapeWorker {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        scraper: Scraper,
        queue: QueueReceiver,
        cache: ResultCache,
        settings: WorkerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            scraper,
            queue,
            cache,
            settings,
            shutdown,
            timeouts_in_a_row: 0,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.queue.resource_type()
    }

    /// Run until the shutdown token fires. The session is closed on exit.
    pub async fn run(mut self) {
        let resource_type = self.resource_type();
        let mut state = WorkerState::Starting;
        let mut session: Option<Box<dyn BrowserSession>> = None;
        info!(%resource_type, "worker started");

        while !self.shutdown.is_cancelled() {
            state = match state {
                WorkerState::Starting => match self.provider.open().await {
                    Ok(opened) => {
                        info!(%resource_type, "browser session ready");
                        session = Some(opened);
                        self.timeouts_in_a_row = 0;
                        WorkerState::Active
                    },
                    Err(e) => {
                        error!(%resource_type, error = %e, "failed to open browser session");
                        WorkerState::Faulted
                    },
                },
                WorkerState::Faulted => {
                    if let Some(broken) = session.take() {
                        broken.close().await;
                    }
                    if pause(self.settings.restart_backoff, &self.shutdown).await.is_err() {
                        break;
                    }
                    WorkerState::Starting
                },
                WorkerState::Active => match session.as_deref() {
                    None => {
                        warn!(%resource_type, "active worker without a session");
                        WorkerState::Starting
                    },
                    Some(active) => match self.queue.try_dequeue() {
                        Some(job) => self.process(active, job).await,
                        None => {
                            self.queue
                                .wait(self.settings.poll_interval, &self.shutdown)
                                .await;
                            WorkerState::Active
                        },
                    },
                },
            };
        }

        if let Some(open) = session.take() {
            open.close().await;
        }
        info!(%resource_type, pending = self.queue.len(), "worker stopped");
    }

    /// Scrape one job and record its response. Returns the next state.
    async fn process(&mut self, session: &dyn BrowserSession, job: QueuedJob) -> WorkerState {
        let QueuedJob {
            job_id,
            request,
            enqueued_at,
        } = job;
        debug!(
            %job_id,
            resource_type = %request.resource_type,
            queued_ms = enqueued_at.elapsed().as_millis() as u64,
            "job dequeued"
        );

        let cancel = self.shutdown.child_token();
        let outcome = self.scraper.scrape(session, job_id, &request, &cancel).await;
        self.cache.set(outcome.response);

        if outcome.driver_fault {
            warn!(%job_id, "driver fault, recycling browser session");
            return WorkerState::Faulted;
        }

        if !outcome.unresponsive {
            self.timeouts_in_a_row = 0;
            return WorkerState::Active;
        }
        self.timeouts_in_a_row += 1;
        if self.timeouts_in_a_row >= self.settings.max_consecutive_timeouts {
            warn!(
                %job_id,
                timeouts = self.timeouts_in_a_row,
                "browser keeps timing out, recycling browser session"
            );
            WorkerState::Faulted
        } else {
            WorkerState::Active
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::queue::{QueueSender, request_queue},
        tokio::{
            task::JoinHandle,
            time::{self, Instant},
        },
        trawl_browser::{
            ScrapeAction, ScrapeRequest, ScrapeStatus, ScraperConfig,
            testing::{FakeProvider, FakeScript},
        },
        trawl_common::JobId,
    };

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(1000),
            restart_backoff: Duration::from_millis(1000),
            max_consecutive_timeouts: 3,
        }
    }

    fn scraper() -> Scraper {
        Scraper::new(ScraperConfig {
            job_timeout: Duration::from_secs(20),
            screenshot_settle: Duration::from_millis(1000),
            wait_poll: Duration::from_millis(100),
            allowed_domains: Vec::new(),
        })
    }

    fn spawn_worker(
        provider: &Arc<FakeProvider>,
        scraper: Scraper,
        settings: WorkerSettings,
        resource_type: ResourceType,
    ) -> (QueueSender, ResultCache, CancellationToken, JoinHandle<()>) {
        let (tx, rx) = request_queue(resource_type, 0);
        let cache = ResultCache::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ScrapeWorker::new(
                provider.clone(),
                scraper,
                rx,
                cache.clone(),
                settings,
                shutdown.clone(),
            )
            .run(),
        );
        (tx, cache, shutdown, handle)
    }

    async fn wait_for(
        cache: &ResultCache,
        job_id: JobId,
        resource_type: ResourceType,
    ) -> trawl_browser::ScrapeResponse {
        loop {
            if let Some(resp) = cache.try_get(job_id, resource_type) {
                return resp;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn processes_jobs_and_caches_results() {
        let provider = Arc::new(FakeProvider::new(FakeScript::default()));
        let (tx, rx) = request_queue(ResourceType::PageSource, 0);
        let cache = ResultCache::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let worker = ScrapeWorker::new(
            provider.clone(),
            scraper(),
            rx,
            cache.clone(),
            settings(),
            shutdown.clone(),
        );
        let handle = tokio::spawn(worker.run());

        let job_id = JobId::new();
        let started = Instant::now();
        tx.enqueue(QueuedJob::new(
            job_id,
            ScrapeRequest::new("https://example.com", ResourceType::PageSource)
                .with_actions(vec![ScrapeAction::Sleep { duration_ms: 1000 }]),
        ))
        .unwrap();

        let resp = wait_for(&cache, job_id, ResourceType::PageSource).await;
        assert_eq!(resp.status, ScrapeStatus::Ok);
        assert!(started.elapsed() >= Duration::from_millis(1000));

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(provider.opened(), 1);
        assert!(provider.sessions()[0].is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_driver_fault() {
        let provider = Arc::new(FakeProvider::new(
            FakeScript::default().fault_on("https://crash.example/"),
        ));
        let (tx, rx) = request_queue(ResourceType::Screenshot, 0);
        let cache = ResultCache::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ScrapeWorker::new(
                provider.clone(),
                scraper(),
                rx,
                cache.clone(),
                settings(),
                shutdown.clone(),
            )
            .run(),
        );

        let crashed = JobId::new();
        let healthy = JobId::new();
        tx.enqueue(QueuedJob::new(
            crashed,
            ScrapeRequest::new("https://crash.example/", ResourceType::Screenshot),
        ))
        .unwrap();
        tx.enqueue(QueuedJob::new(
            healthy,
            ScrapeRequest::new("https://example.com/", ResourceType::Screenshot),
        ))
        .unwrap();

        let first = wait_for(&cache, crashed, ResourceType::Screenshot).await;
        assert_eq!(first.status, ScrapeStatus::Error);
        assert_eq!(first.job_id, crashed);

        let second = wait_for(&cache, healthy, ResourceType::Screenshot).await;
        assert_eq!(second.status, ScrapeStatus::Ok);

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(provider.opened(), 2);
        let sessions = provider.sessions();
        assert!(sessions[0].is_closed());
        assert_eq!(sessions[1].journal()[0], "navigate https://example.com/");
    }

    #[tokio::test(start_paused = true)]
    async fn retries_failed_launches() {
        let provider = Arc::new(FakeProvider::new(FakeScript::default()).failing_launches(2));
        let (tx, rx) = request_queue(ResourceType::PageSource, 0);
        let cache = ResultCache::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ScrapeWorker::new(
                provider.clone(),
                scraper(),
                rx,
                cache.clone(),
                settings(),
                shutdown.clone(),
            )
            .run(),
        );

        let job_id = JobId::new();
        tx.enqueue(QueuedJob::new(
            job_id,
            ScrapeRequest::new("https://example.com", ResourceType::PageSource),
        ))
        .unwrap();

        let started = Instant::now();
        let resp = wait_for(&cache, job_id, ResourceType::PageSource).await;
        assert!(resp.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(2000));
        assert_eq!(provider.opened(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_running_job() {
        let provider = Arc::new(FakeProvider::new(FakeScript::default()));
        let (tx, rx) = request_queue(ResourceType::PageSource, 0);
        let cache = ResultCache::new(Duration::from_secs(600));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(
            ScrapeWorker::new(
                provider.clone(),
                scraper(),
                rx,
                cache.clone(),
                settings(),
                shutdown.clone(),
            )
            .run(),
        );

        let job_id = JobId::new();
        tx.enqueue(QueuedJob::new(
            job_id,
            ScrapeRequest::new("https://example.com", ResourceType::PageSource)
                .with_actions(vec![ScrapeAction::Sleep { duration_ms: 15_000 }]),
        ))
        .unwrap();

        time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        shutdown.cancel();
        handle.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(1));
        let resp = cache.try_get(job_id, ResourceType::PageSource).unwrap();
        assert_eq!(resp.status, ScrapeStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_after_an_action_recycles_the_session() {
        let provider = Arc::new(FakeProvider::new(
            FakeScript::default().fault_on("https://crash.example/"),
        ));
        let (tx, cache, shutdown, handle) =
            spawn_worker(&provider, scraper(), settings(), ResourceType::PageSource);

        let crashed = JobId::new();
        let healthy = JobId::new();
        tx.enqueue(QueuedJob::new(
            crashed,
            ScrapeRequest::new("https://example.com/", ResourceType::PageSource).with_actions(
                vec![
                    ScrapeAction::Sleep { duration_ms: 10 },
                    ScrapeAction::NavigateTo {
                        url: "https://crash.example/".into(),
                    },
                ],
            ),
        ))
        .unwrap();
        tx.enqueue(QueuedJob::new(
            healthy,
            ScrapeRequest::new("https://example.com/", ResourceType::PageSource),
        ))
        .unwrap();

        let first = wait_for(&cache, crashed, ResourceType::PageSource).await;
        assert_eq!(first.status, ScrapeStatus::Error);
        assert_eq!(first.job_id, crashed);

        let second = wait_for(&cache, healthy, ResourceType::PageSource).await;
        assert_eq!(second.status, ScrapeStatus::Ok);
        assert_eq!(second.job_id, healthy);

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(provider.opened(), 2);
        let sessions = provider.sessions();
        assert!(sessions[0].is_closed());
        assert_eq!(sessions[1].journal(), vec!["navigate https://example.com/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_browser_is_replaced_after_the_job_deadline() {
        let provider = Arc::new(FakeProvider::new(
            FakeScript::default().navigate_delay(Duration::from_secs(3600)),
        ));
        let scraper = Scraper::new(ScraperConfig {
            job_timeout: Duration::from_secs(2),
            ..scraper().config().clone()
        });
        let (tx, cache, shutdown, handle) =
            spawn_worker(&provider, scraper, settings(), ResourceType::PageSource);

        let jobs: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        for &job_id in &jobs {
            tx.enqueue(QueuedJob::new(
                job_id,
                ScrapeRequest::new("https://example.com/", ResourceType::PageSource),
            ))
            .unwrap();
        }

        let started = Instant::now();
        for &job_id in &jobs {
            let resp = wait_for(&cache, job_id, ResourceType::PageSource).await;
            assert_eq!(resp.status, ScrapeStatus::Error);
            assert!(resp.result.unwrap().contains("still pending"));
        }
        // Three deadlines plus two backoffs, nowhere near the hour-long load.
        assert!(started.elapsed() < Duration::from_secs(60));

        // Each job ran on its own session.
        assert!(provider.opened() >= 3);
        let sessions = provider.sessions();
        assert!(sessions[0].is_closed());
        assert!(sessions[1].is_closed());

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_recycle_the_session() {
        let provider = Arc::new(FakeProvider::new(
            FakeScript::default().unresponsive_on("https://slow.example/"),
        ));
        let settings = WorkerSettings {
            max_consecutive_timeouts: 2,
            ..settings()
        };
        let (tx, cache, shutdown, handle) =
            spawn_worker(&provider, scraper(), settings, ResourceType::PageSource);

        // slow, fine, slow, slow (second in a row), fine
        let urls = [
            "https://slow.example/",
            "https://example.com/",
            "https://slow.example/",
            "https://slow.example/",
            "https://example.com/",
        ];
        let jobs: Vec<JobId> = urls.iter().map(|_| JobId::new()).collect();
        for (&job_id, url) in jobs.iter().zip(urls) {
            tx.enqueue(QueuedJob::new(
                job_id,
                ScrapeRequest::new(url, ResourceType::PageSource),
            ))
            .unwrap();
        }

        for (&job_id, url) in jobs.iter().zip(urls) {
            let resp = wait_for(&cache, job_id, ResourceType::PageSource).await;
            assert_eq!(resp.is_ok(), url == "https://example.com/", "{url}");
        }

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(provider.opened(), 2);
        let sessions = provider.sessions();
        assert!(sessions[0].is_closed());
        assert_eq!(sessions[0].journal(), vec!["navigate https://example.com/"]);
        assert_eq!(sessions[1].journal(), vec!["navigate https://example.com/"]);
    }
}
