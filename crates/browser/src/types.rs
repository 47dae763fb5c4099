//! Scrape actions and request/response structures.

use std::{fmt, time::Duration};

use {
    serde::{Deserialize, Serialize},
    trawl_common::JobId,
};

/// One scripted interaction step, executed before content is captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeAction {
    /// Pause the job.
    Sleep { duration_ms: u64 },

    /// Poll until the element is present and visible.
    WaitForElement {
        selector: String,
        #[serde(default)]
        timeout_ms: u64,
    },

    /// Replace the content of an input element.
    SetInputElement {
        selector: String,
        value: String,
        /// Wait for visibility first when non-zero.
        #[serde(default)]
        timeout_ms: u64,
    },

    /// Click an element.
    ClickButton {
        selector: String,
        /// Wait for visibility first when non-zero.
        #[serde(default)]
        timeout_ms: u64,
    },

    /// Resize the viewport.
    SetBrowserSize { width: u32, height: u32 },

    /// Load another URL in the same page.
    NavigateTo { url: String },
}

impl fmt::Display for ScrapeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sleep { duration_ms } => write!(f, "sleep({duration_ms}ms)"),
            Self::WaitForElement {
                selector,
                timeout_ms,
            } => write!(f, "wait_for_element({selector}, {timeout_ms}ms)"),
            Self::SetInputElement {
                selector,
                timeout_ms,
                ..
            } => write!(f, "set_input_element({selector}, {timeout_ms}ms)"),
            Self::ClickButton {
                selector,
                timeout_ms,
            } => write!(f, "click_button({selector}, {timeout_ms}ms)"),
            Self::SetBrowserSize { width, height } => {
                write!(f, "set_browser_size({width}x{height})")
            },
            Self::NavigateTo { url } => write!(f, "navigate_to({url})"),
        }
    }
}

/// What to capture once the actions have run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    #[serde(alias = "PageSource")]
    PageSource,
    #[serde(alias = "Screenshot")]
    Screenshot,
}

impl ResourceType {
    pub const ALL: [ResourceType; 2] = [ResourceType::PageSource, ResourceType::Screenshot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageSource => "page_source",
            Self::Screenshot => "screenshot",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request header sent with every page load of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

/// A page to visit, the steps to run on it, and what to capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// Absolute http(s) URL.
    pub url: String,

    #[serde(default)]
    pub resource_type: ResourceType,

    /// Overrides the configured user agent for this job.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Re-indent captured HTML. Best effort.
    #[serde(default)]
    pub pretty_print_output: bool,

    /// Steps run in order after the initial navigation.
    #[serde(default)]
    pub actions: Vec<ScrapeAction>,

    /// Extra request headers. Order is kept and duplicates are allowed.
    #[serde(default)]
    pub headers: Vec<HttpHeader>,

    /// Capture the whole document rather than the viewport.
    #[serde(default = "default_full_page")]
    pub full_page: bool,
}

fn default_full_page() -> bool {
    true
}

impl ScrapeRequest {
    pub fn new(url: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            url: url.into(),
            resource_type,
            user_agent: None,
            pretty_print_output: false,
            actions: Vec::new(),
            headers: Vec::new(),
            full_page: default_full_page(),
        }
    }

    #[must_use]
    pub fn with_actions(mut self, actions: Vec<ScrapeAction>) -> Self {
        self.actions = actions;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeStatus {
    Ok,
    Error,
}

/// Outcome of one job: HTML, a base64 PNG, or an error description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResponse {
    pub job_id: JobId,
    pub status: ScrapeStatus,
    pub resource_type: ResourceType,
    pub result: Option<String>,
}

impl ScrapeResponse {
    pub fn ok(job_id: JobId, resource_type: ResourceType, payload: String) -> Self {
        Self {
            job_id,
            status: ScrapeStatus::Ok,
            resource_type,
            result: Some(payload),
        }
    }

    pub fn error(job_id: JobId, resource_type: ResourceType, description: impl Into<String>) -> Self {
        Self {
            job_id,
            status: ScrapeStatus::Error,
            resource_type,
            result: Some(description.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ScrapeStatus::Ok
    }
}

/// Runtime browser settings, derived from the config file section.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub endpoint: Option<String>,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub navigation_timeout: Duration,
    pub user_agent: Option<String>,
    pub chrome_args: Vec<String>,
    pub allowed_domains: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self::from(&trawl_config::BrowserConfig::default())
    }
}

impl From<&trawl_config::BrowserConfig> for BrowserConfig {
    fn from(cfg: &trawl_config::BrowserConfig) -> Self {
        Self {
            endpoint: cfg.endpoint.clone().filter(|e| !e.trim().is_empty()),
            chrome_path: cfg.chrome_path.clone(),
            headless: cfg.headless,
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            device_scale_factor: cfg.device_scale_factor,
            navigation_timeout: Duration::from_millis(cfg.navigation_timeout_ms),
            user_agent: cfg.user_agent.clone(),
            chrome_args: cfg.chrome_args.clone(),
            allowed_domains: cfg.allowed_domains.clone(),
        }
    }
}
