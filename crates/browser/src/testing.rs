//! Scripted in-memory sessions for tests.

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::BrowserError,
    selector::Selector,
    session::{BrowserSession, SessionProvider},
    types::HttpHeader,
};

/// Behaviour shared by every session a [`FakeProvider`] opens.
///
/// Selectors are matched on their resolved text, so `#go` and
/// `//*[@id="go"]` are distinct.
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub page_source: String,
    pub screenshot: Vec<u8>,
    pub hidden: HashSet<String>,
    pub missing: HashSet<String>,
    /// Visibility probes answered with a stale element before succeeding.
    pub stale_probes: usize,
    /// Navigating to one of these kills the session.
    pub fault_urls: HashSet<String>,
    /// Navigating to one of these fails as if the browser stopped answering.
    pub unresponsive_urls: HashSet<String>,
    pub navigate_delay: Duration,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            page_source: "<html><head><title>Fake</title></head><body><p>hello</p></body></html>"
                .into(),
            screenshot: vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a],
            hidden: HashSet::new(),
            missing: HashSet::new(),
            stale_probes: 0,
            fault_urls: HashSet::new(),
            unresponsive_urls: HashSet::new(),
            navigate_delay: Duration::ZERO,
        }
    }
}

impl FakeScript {
    #[must_use]
    pub fn page_source(mut self, html: impl Into<String>) -> Self {
        self.page_source = html.into();
        self
    }

    #[must_use]
    pub fn hidden(mut self, selector: &str) -> Self {
        self.hidden.insert(selector.to_string());
        self
    }

    #[must_use]
    pub fn missing(mut self, selector: &str) -> Self {
        self.missing.insert(selector.to_string());
        self
    }

    #[must_use]
    pub fn stale_probes(mut self, count: usize) -> Self {
        self.stale_probes = count;
        self
    }

    #[must_use]
    pub fn fault_on(mut self, url: &str) -> Self {
        self.fault_urls.insert(url.to_string());
        self
    }

    #[must_use]
    pub fn unresponsive_on(mut self, url: &str) -> Self {
        self.unresponsive_urls.insert(url.to_string());
        self
    }

    #[must_use]
    pub fn navigate_delay(mut self, delay: Duration) -> Self {
        self.navigate_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct FakeState {
    journal: Vec<String>,
    probes: usize,
    dead: bool,
    closed: bool,
}

/// A session that records what it was asked to do.
///
/// Clones share state, so a test can keep a handle to a session it passed
/// into a worker.
#[derive(Debug, Clone)]
pub struct FakeSession {
    script: Arc<FakeScript>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script: Arc::new(script),
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every state-changing call, in order. Visibility probes are counted
    /// separately.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }

    pub fn probe_count(&self) -> usize {
        self.state().probes
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn record(&self, entry: String) -> Result<(), BrowserError> {
        let mut state = self.state();
        if state.dead || state.closed {
            return Err(BrowserError::ConnectionClosed("session is gone".into()));
        }
        state.journal.push(entry);
        Ok(())
    }

    fn alive(&self) -> Result<(), BrowserError> {
        let state = self.state();
        if state.dead || state.closed {
            return Err(BrowserError::ConnectionClosed("session is gone".into()));
        }
        Ok(())
    }

    fn lookup(&self, selector: &Selector) -> Result<(), BrowserError> {
        if self.script.missing.contains(selector.as_str()) {
            return Err(BrowserError::ElementNotFound(selector.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.record(format!("user_agent {user_agent}"))
    }

    async fn set_extra_headers(&self, headers: &[HttpHeader]) -> Result<(), BrowserError> {
        let joined = headers
            .iter()
            .map(|h| format!("{}={}", h.name, h.value))
            .collect::<Vec<_>>()
            .join(",");
        self.record(format!("headers {joined}"))
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        if !self.script.navigate_delay.is_zero() {
            tokio::time::sleep(self.script.navigate_delay).await;
        }
        if self.script.fault_urls.contains(url) {
            self.state().dead = true;
            return Err(BrowserError::ConnectionClosed(format!(
                "browser died loading {url}"
            )));
        }
        if self.script.unresponsive_urls.contains(url) {
            return Err(BrowserError::Unresponsive(format!(
                "no answer while loading {url}"
            )));
        }
        self.record(format!("navigate {url}"))
    }

    async fn is_element_visible(&self, selector: &Selector) -> Result<bool, BrowserError> {
        self.alive()?;
        let probe = {
            let mut state = self.state();
            state.probes += 1;
            state.probes
        };
        if probe <= self.script.stale_probes {
            return Err(BrowserError::StaleElement(selector.to_string()));
        }
        self.lookup(selector)?;
        Ok(!self.script.hidden.contains(selector.as_str()))
    }

    async fn set_input_value(&self, selector: &Selector, value: &str) -> Result<(), BrowserError> {
        self.alive()?;
        self.lookup(selector)?;
        self.record(format!("set_input {selector} = {value}"))
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        self.alive()?;
        self.lookup(selector)?;
        self.record(format!("click {selector}"))
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        self.record(format!("resize {width}x{height}"))
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.alive()?;
        Ok(self.script.page_source.clone())
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        self.record(format!("screenshot full_page={full_page}"))?;
        Ok(self.script.screenshot.clone())
    }

    async fn close(&self) {
        self.state().closed = true;
    }
}

/// Hands out [`FakeSession`]s built from one script.
#[derive(Debug)]
pub struct FakeProvider {
    script: FakeScript,
    launch_failures: AtomicUsize,
    opened: AtomicUsize,
    sessions: Mutex<Vec<FakeSession>>,
}

impl FakeProvider {
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            launch_failures: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` opens with a launch error.
    #[must_use]
    pub fn failing_launches(self, count: usize) -> Self {
        self.launch_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Successful opens so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Handles to every session opened so far, oldest first.
    pub fn sessions(&self) -> Vec<FakeSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SessionProvider for FakeProvider {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let failed = self
            .launch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BrowserError::LaunchFailed("scripted launch failure".into()));
        }

        let session = FakeSession::new(self.script.clone());
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(session))
    }
}
