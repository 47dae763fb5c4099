//! Ordered interpreter for [`ScrapeAction`] lists.

use {
    tokio::time::{self, Duration, Instant},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
    trawl_common::JobId,
};

use crate::{
    error::BrowserError,
    selector::Selector,
    session::BrowserSession,
    types::ScrapeAction,
    validate::check_navigation,
};

/// Suspend for `duration` unless `cancel` fires first.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), BrowserError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BrowserError::Cancelled),
        () = time::sleep(duration) => Ok(()),
    }
}

/// Runs actions one at a time against a single session. The first failure
/// stops the list.
pub struct ActionExecutor<'a> {
    session: &'a dyn BrowserSession,
    wait_poll: Duration,
    allowed_domains: &'a [String],
}

impl<'a> ActionExecutor<'a> {
    pub fn new(
        session: &'a dyn BrowserSession,
        wait_poll: Duration,
        allowed_domains: &'a [String],
    ) -> Self {
        Self {
            session,
            wait_poll: wait_poll.max(Duration::from_millis(1)),
            allowed_domains,
        }
    }

    /// Execute `actions` in order. Errors are wrapped with the 1-based step
    /// number and the action that raised them.
    pub async fn run(
        &self,
        job_id: JobId,
        actions: &[ScrapeAction],
        cancel: &CancellationToken,
    ) -> Result<(), BrowserError> {
        for (i, action) in actions.iter().enumerate() {
            let step = i + 1;
            if cancel.is_cancelled() {
                return Err(BrowserError::Cancelled);
            }

            info!(%job_id, step, total = actions.len(), %action, "running action");
            let started = Instant::now();

            self.execute(action, cancel)
                .await
                .map_err(|source| BrowserError::ActionFailed {
                    step,
                    action: action.to_string(),
                    source: Box::new(source),
                })?;

            debug!(
                %job_id,
                step,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "action completed"
            );
        }

        Ok(())
    }

    async fn execute(
        &self,
        action: &ScrapeAction,
        cancel: &CancellationToken,
    ) -> Result<(), BrowserError> {
        match action {
            ScrapeAction::Sleep { duration_ms } => {
                pause(Duration::from_millis(*duration_ms), cancel).await
            },
            ScrapeAction::WaitForElement {
                selector,
                timeout_ms,
            } => {
                let selector = Selector::parse(selector)?;
                self.wait_for_visible(&selector, *timeout_ms, cancel).await
            },
            ScrapeAction::SetInputElement {
                selector,
                value,
                timeout_ms,
            } => {
                let selector = Selector::parse(selector)?;
                if *timeout_ms > 0 {
                    self.wait_for_visible(&selector, *timeout_ms, cancel).await?;
                }
                self.session.set_input_value(&selector, value).await
            },
            ScrapeAction::ClickButton {
                selector,
                timeout_ms,
            } => {
                let selector = Selector::parse(selector)?;
                if *timeout_ms > 0 {
                    self.wait_for_visible(&selector, *timeout_ms, cancel).await?;
                }
                self.session.click(&selector).await
            },
            ScrapeAction::SetBrowserSize { width, height } => {
                self.session.resize(*width, *height).await
            },
            ScrapeAction::NavigateTo { url } => {
                let url = check_navigation(url, self.allowed_domains)?;
                self.session.navigate(url.as_str()).await
            },
        }
    }

    /// Poll until `selector` is visible or `timeout_ms` has elapsed.
    ///
    /// Missing and stale elements keep the poll going. Each check is bounded
    /// by the time left, so the wait does not overrun the timeout by more
    /// than one poll interval. A zero timeout checks exactly once.
    pub async fn wait_for_visible(
        &self,
        selector: &Selector,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> Result<(), BrowserError> {
        let timeout = Duration::from_millis(timeout_ms);
        let deadline = Instant::now() + timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget = if remaining.is_zero() {
                self.wait_poll
            } else {
                remaining
            };

            let checked = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(BrowserError::Cancelled),
                checked = time::timeout(budget, self.session.is_element_visible(selector)) => checked,
            };

            let last = match checked {
                Ok(Ok(true)) => {
                    debug!(%selector, attempts, "element visible");
                    return Ok(());
                },
                Ok(Ok(false)) => "present but hidden".to_string(),
                Ok(Err(e)) if e.is_transient() => e.to_string(),
                Ok(Err(e)) => return Err(e),
                Err(_) => "visibility check timed out".to_string(),
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "{selector} not visible after {timeout_ms}ms ({attempts} checks, last: {last})"
                )));
            }
            pause(self.wait_poll.min(deadline - now), cancel).await?;
        }
    }
}
