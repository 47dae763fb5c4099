//! One job end to end: navigate, run the actions, capture.

use std::sync::atomic::{AtomicBool, Ordering};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    tokio::time::{self, Duration, Instant},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    trawl_common::JobId,
};

use crate::{
    error::BrowserError,
    executor::{ActionExecutor, pause},
    pretty::pretty_print,
    selector::Selector,
    session::BrowserSession,
    types::{HttpHeader, ResourceType, ScrapeRequest, ScrapeResponse},
    validate::validate_request,
};

/// Timing and policy for [`Scraper`].
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Deadline for a whole job, navigation through capture.
    pub job_timeout: Duration,
    /// Delay before a screenshot is taken.
    pub screenshot_settle: Duration,
    pub wait_poll: Duration,
    pub allowed_domains: Vec<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self::from(&trawl_config::TrawlConfig::default())
    }
}

impl From<&trawl_config::TrawlConfig> for ScraperConfig {
    fn from(cfg: &trawl_config::TrawlConfig) -> Self {
        Self {
            job_timeout: Duration::from_millis(cfg.worker.job_timeout_ms),
            screenshot_settle: Duration::from_millis(cfg.worker.screenshot_settle_ms),
            wait_poll: Duration::from_millis(cfg.worker.wait_poll_ms),
            allowed_domains: cfg.browser.allowed_domains.clone(),
        }
    }
}

/// What a job produced, plus what it says about the session's health.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub response: ScrapeResponse,
    /// The session must be discarded.
    pub driver_fault: bool,
    /// A browser command timed out. Callers decide how many in a row they
    /// tolerate before recycling.
    pub unresponsive: bool,
}

/// Runs scrape jobs against a session it is handed. Never fails: every
/// error becomes an `Error` response.
#[derive(Debug, Clone, Default)]
pub struct Scraper {
    config: ScraperConfig,
}

impl Scraper {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    pub async fn scrape(
        &self,
        session: &dyn BrowserSession,
        job_id: JobId,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> ScrapeOutcome {
        let started = Instant::now();
        let resource_type = request.resource_type;

        let watched = WatchedSession::new(session);
        // A deadline that expires inside a browser call means the session hung.
        let (result, hung) = match time::timeout(
            self.config.job_timeout,
            self.capture(&watched, job_id, request, cancel),
        )
        .await
        {
            Ok(result) => (result, false),
            Err(_) if watched.is_waiting() => (
                Err(BrowserError::Unresponsive(format!(
                    "job did not finish within {}ms, browser call still pending",
                    self.config.job_timeout.as_millis()
                ))),
                true,
            ),
            Err(_) => (
                Err(BrowserError::Timeout(format!(
                    "job did not finish within {}ms",
                    self.config.job_timeout.as_millis()
                ))),
                false,
            ),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(payload) => {
                info!(
                    %job_id,
                    %resource_type,
                    url = %request.url,
                    bytes = payload.len(),
                    elapsed_ms,
                    "scrape succeeded"
                );
                ScrapeOutcome {
                    response: ScrapeResponse::ok(job_id, resource_type, payload),
                    driver_fault: false,
                    unresponsive: false,
                }
            },
            Err(e) => {
                let driver_fault = hung || e.is_driver_fault();
                let unresponsive = e.is_unresponsive();
                warn!(
                    %job_id,
                    %resource_type,
                    url = %request.url,
                    elapsed_ms,
                    driver_fault,
                    unresponsive,
                    error = %e,
                    "scrape failed"
                );
                ScrapeOutcome {
                    response: ScrapeResponse::error(job_id, resource_type, e.to_string()),
                    driver_fault,
                    unresponsive,
                }
            },
        }
    }

    async fn capture(
        &self,
        session: &dyn BrowserSession,
        job_id: JobId,
        request: &ScrapeRequest,
        cancel: &CancellationToken,
    ) -> Result<String, BrowserError> {
        validate_request(request, &self.config.allowed_domains)?;
        if cancel.is_cancelled() {
            return Err(BrowserError::Cancelled);
        }

        if let Some(ref ua) = request.user_agent {
            session.set_user_agent(ua).await?;
        }
        if !request.headers.is_empty() {
            session.set_extra_headers(&request.headers).await?;
        }

        session.navigate(request.url.trim()).await?;

        ActionExecutor::new(session, self.config.wait_poll, &self.config.allowed_domains)
            .run(job_id, &request.actions, cancel)
            .await?;

        match request.resource_type {
            ResourceType::PageSource => {
                let html = session.page_source().await?;
                if !request.pretty_print_output {
                    return Ok(html);
                }
                match pretty_print(&html) {
                    Ok(pretty) => Ok(pretty),
                    Err(e) => {
                        warn!(%job_id, error = %e, "pretty-print failed, returning raw source");
                        Ok(html)
                    },
                }
            },
            ResourceType::Screenshot => {
                pause(self.config.screenshot_settle, cancel).await?;
                let png = session.screenshot(request.full_page).await?;
                Ok(BASE64.encode(png))
            },
        }
    }
}

// ── WatchedSession ──────────────────────────────────────────────────────────

/// Remembers whether the latest browser call has returned.
///
/// The flag is set when a call starts and cleared only when it completes,
/// so a call dropped by a timeout leaves it set.
struct WatchedSession<'a> {
    inner: &'a dyn BrowserSession,
    waiting: AtomicBool,
}

impl<'a> WatchedSession<'a> {
    fn new(inner: &'a dyn BrowserSession) -> Self {
        Self {
            inner,
            waiting: AtomicBool::new(false),
        }
    }

    fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }

    async fn track<T>(&self, call: impl Future<Output = T>) -> T {
        self.waiting.store(true, Ordering::SeqCst);
        let out = call.await;
        self.waiting.store(false, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl BrowserSession for WatchedSession<'_> {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.track(self.inner.set_user_agent(user_agent)).await
    }

    async fn set_extra_headers(&self, headers: &[HttpHeader]) -> Result<(), BrowserError> {
        self.track(self.inner.set_extra_headers(headers)).await
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.track(self.inner.navigate(url)).await
    }

    async fn is_element_visible(&self, selector: &Selector) -> Result<bool, BrowserError> {
        self.track(self.inner.is_element_visible(selector)).await
    }

    async fn set_input_value(&self, selector: &Selector, value: &str) -> Result<(), BrowserError> {
        self.track(self.inner.set_input_value(selector, value)).await
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.track(self.inner.click(selector)).await
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.track(self.inner.resize(width, height)).await
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.track(self.inner.page_source()).await
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        self.track(self.inner.screenshot(full_page)).await
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
