//! Chrome DevTools Protocol sessions.

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page,
        cdp::browser_protocol::{
            emulation::{SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams},
            input::{
                DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams, MouseButton,
            },
            network::{Headers, SetExtraHttpHeadersParams},
            page::CaptureScreenshotFormat,
        },
        error::CdpError,
        handler::{HandlerConfig, viewport::Viewport},
        page::ScreenshotParams,
    },
    futures::StreamExt,
    serde_json::Value,
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    error::BrowserError,
    selector::Selector,
    session::{BrowserSession, SessionProvider},
    types::{BrowserConfig, HttpHeader},
};

/// Opens CDP sessions against a remote endpoint or a locally launched
/// Chrome/Chromium.
pub struct CdpSessionProvider {
    config: BrowserConfig,
}

impl CdpSessionProvider {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn viewport(&self) -> Viewport {
        Viewport {
            width: self.config.viewport_width,
            height: self.config.viewport_height,
            device_scale_factor: Some(self.config.device_scale_factor),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        }
    }

    async fn connect(&self, ws_url: &str) -> Result<(Browser, JoinHandle<()>), BrowserError> {
        info!(ws_url, "connecting to remote browser");

        let handler_config = HandlerConfig {
            request_timeout: self.config.navigation_timeout,
            viewport: Some(self.viewport()),
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| {
                BrowserError::LaunchFailed(format!("failed to connect to browser at {ws_url}: {e}"))
            })?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
            debug!("browser event handler exited (connection closed)");
        });

        Ok((browser, handle))
    }

    async fn launch(&self) -> Result<(Browser, JoinHandle<()>), BrowserError> {
        let mut builder = CdpBrowserConfig::builder();

        // chromiumoxide runs headless unless asked otherwise
        if !self.config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .viewport(self.viewport())
            .request_timeout(self.config.navigation_timeout);

        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");

        let config = builder.build().map_err(|e| {
            BrowserError::LaunchFailed(format!("failed to build browser config: {e}"))
        })?;

        info!(
            headless = self.config.headless,
            viewport_width = self.config.viewport_width,
            viewport_height = self.config.viewport_height,
            "launching local browser"
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
            debug!("browser event handler exited");
        });

        Ok((browser, handle))
    }
}

/// Where a session's browser came from, which decides what closing it tears
/// down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOrigin {
    /// Spawned by this process; closing the session shuts the browser down.
    Launched,
    /// Reached over a DevTools endpoint and possibly shared with other
    /// clients; closing the session only closes its own tab.
    Connected,
}

impl SessionOrigin {
    fn for_endpoint(endpoint: Option<&str>) -> Self {
        match endpoint {
            Some(_) => Self::Connected,
            None => Self::Launched,
        }
    }

    fn owns_browser(self) -> bool {
        self == Self::Launched
    }
}

#[async_trait]
impl SessionProvider for CdpSessionProvider {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let origin = SessionOrigin::for_endpoint(self.config.endpoint.as_deref());
        let (browser, handler) = match self.config.endpoint.as_deref() {
            Some(ws_url) => self.connect(ws_url).await?,
            None => self.launch().await?,
        };

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(BrowserError::LaunchFailed(format!("failed to open page: {e}")));
            },
        };

        let session = CdpSession {
            browser: Mutex::new(browser),
            page,
            handler,
            device_scale_factor: self.config.device_scale_factor,
            origin,
        };

        // The browser-level viewport is not always applied to new pages.
        if let Err(e) = session
            .resize(self.config.viewport_width, self.config.viewport_height)
            .await
        {
            warn!(error = %e, "failed to set page viewport");
        }

        if let Some(ref ua) = self.config.user_agent
            && let Err(e) = session.set_user_agent(ua).await
        {
            session.close().await;
            return Err(e);
        }

        debug!(?origin, "browser session opened");
        Ok(Box::new(session))
    }
}

/// A single page in a CDP-driven browser.
pub struct CdpSession {
    browser: Mutex<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    device_scale_factor: f64,
    origin: SessionOrigin,
}

/// Outcome of a DOM probe, reported by the injected scripts.
const PROBE_VISIBLE: &str = "visible";
const PROBE_HIDDEN: &str = "hidden";
const PROBE_MISSING: &str = "missing";
const PROBE_STALE: &str = "stale";
const PROBE_INVALID: &str = "invalid";

impl CdpSession {
    /// Map a CDP failure, treating any error after the event handler has
    /// exited as a lost connection.
    fn cdp_error(&self, err: CdpError, otherwise: impl FnOnce(String) -> BrowserError) -> BrowserError {
        if self.handler.is_finished() {
            return BrowserError::ConnectionClosed(format!("browser event loop exited: {err}"));
        }
        BrowserError::from_cdp(err, otherwise)
    }

    async fn eval(&self, js: &str) -> Result<Value, BrowserError> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| self.cdp_error(e, classify_eval_error))?;
        Ok(result.into_value::<Value>().unwrap_or(Value::Null))
    }

    /// Run a probe script and turn its status string into an error.
    fn probe_status(selector: &Selector, value: &Value) -> Result<(), BrowserError> {
        match value.as_str() {
            Some(PROBE_MISSING) | None => Err(BrowserError::ElementNotFound(selector.to_string())),
            Some(PROBE_STALE) => Err(BrowserError::StaleElement(selector.to_string())),
            Some(PROBE_INVALID) => Err(BrowserError::InvalidSelector(selector.to_string())),
            Some(_) => Ok(()),
        }
    }
}

/// A page navigated away while a script ran: the element handle is gone.
fn classify_eval_error(message: String) -> BrowserError {
    if message.contains("Execution context was destroyed")
        || message.contains("Cannot find context with specified id")
    {
        BrowserError::StaleElement(message)
    } else {
        BrowserError::JsEvalFailed(message)
    }
}

/// JavaScript expression resolving `selector` to a node or null.
fn locate_js(selector: &Selector) -> String {
    let literal = selector.to_js_literal();
    match selector {
        Selector::XPath(_) => format!(
            "document.evaluate({literal}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        ),
        Selector::Css(_) => format!("document.querySelector({literal})"),
    }
}

/// Wrap `body` in a function that has the located element bound to `el`.
fn with_element_js(selector: &Selector, body: &str) -> String {
    format!(
        r#"(() => {{
    let el;
    try {{ el = {locate}; }} catch (e) {{ return '{PROBE_INVALID}'; }}
    if (!el) return '{PROBE_MISSING}';
    if (!el.isConnected) return '{PROBE_STALE}';
    {body}
}})()"#,
        locate = locate_js(selector),
    )
}

fn visibility_js(selector: &Selector) -> String {
    with_element_js(
        selector,
        &format!(
            r#"const style = window.getComputedStyle(el);
    if (style.display === 'none' || style.visibility === 'hidden' || style.opacity === '0') return '{PROBE_HIDDEN}';
    const rect = el.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0 ? '{PROBE_VISIBLE}' : '{PROBE_HIDDEN}';"#
        ),
    )
}

fn click_target_js(selector: &Selector) -> String {
    with_element_js(
        selector,
        r#"el.scrollIntoView({ block: 'center', inline: 'center' });
    const rect = el.getBoundingClientRect();
    return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };"#,
    )
}

fn clear_and_focus_js(selector: &Selector) -> String {
    with_element_js(
        selector,
        r#"el.scrollIntoView({ block: 'center' });
    el.focus();
    if ('value' in el) {
        el.value = '';
        el.dispatchEvent(new Event('input', { bubbles: true }));
    } else if (el.isContentEditable) {
        el.textContent = '';
    }
    return 'ok';"#,
    )
}

/// Join repeated header names, since CDP takes a name-to-value object.
fn headers_object(headers: &[HttpHeader]) -> Value {
    let mut object = serde_json::Map::new();
    for header in headers {
        let name = header.name.trim().to_string();
        match object.get_mut(&name) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&header.value);
            },
            _ => {
                object.insert(name, Value::String(header.value.clone()));
            },
        }
    }
    Value::Object(object)
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.page
            .execute(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::Cdp))?;
        debug!(user_agent, "user agent overridden");
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &[HttpHeader]) -> Result<(), BrowserError> {
        let params = SetExtraHttpHeadersParams::new(Headers::new(headers_object(headers)));
        self.page
            .execute(params)
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::Cdp))?;
        debug!(count = headers.len(), "extra request headers set");
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::NavigationFailed))?;
        debug!(url, "navigated");
        Ok(())
    }

    async fn is_element_visible(&self, selector: &Selector) -> Result<bool, BrowserError> {
        let value = self.eval(&visibility_js(selector)).await?;
        Self::probe_status(selector, &value)?;
        Ok(value.as_str() == Some(PROBE_VISIBLE))
    }

    async fn set_input_value(&self, selector: &Selector, value: &str) -> Result<(), BrowserError> {
        let status = self.eval(&clear_and_focus_js(selector)).await?;
        Self::probe_status(selector, &status)?;

        self.page
            .execute(InsertTextParams::new(value))
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::Cdp))?;

        debug!(%selector, chars = value.chars().count(), "input value set");
        Ok(())
    }

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError> {
        let target = self.eval(&click_target_js(selector)).await?;
        let (x, y) = match (
            target.get("x").and_then(Value::as_f64),
            target.get("y").and_then(Value::as_f64),
        ) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                Self::probe_status(selector, &target)?;
                return Err(BrowserError::JsEvalFailed(format!(
                    "no click target for {selector}"
                )));
            },
        };

        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let cmd = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(x)
                .y(y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(BrowserError::Cdp)?;
            self.page
                .execute(cmd)
                .await
                .map_err(|e| self.cdp_error(e, BrowserError::Cdp))?;
        }

        debug!(%selector, x, y, "clicked element");
        Ok(())
    }

    async fn resize(&self, width: u32, height: u32) -> Result<(), BrowserError> {
        let cmd = SetDeviceMetricsOverrideParams::builder()
            .width(width)
            .height(height)
            .device_scale_factor(self.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(BrowserError::InvalidAction)?;
        self.page
            .execute(cmd)
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::Cdp))?;
        debug!(width, height, "viewport resized");
        Ok(())
    }

    async fn page_source(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::Cdp))
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError> {
        let png = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(full_page)
                    .build(),
            )
            .await
            .map_err(|e| self.cdp_error(e, BrowserError::ScreenshotFailed))?;
        debug!(bytes = png.len(), full_page, "took screenshot");
        Ok(png)
    }

    async fn close(&self) {
        if self.origin.owns_browser() {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                debug!(error = %e, "browser close failed");
            }
        } else if let Err(e) = self.page.clone().close().await {
            debug!(error = %e, "page close failed");
        }
        self.handler.abort();
        debug!(origin = ?self.origin, "browser session closed");
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
