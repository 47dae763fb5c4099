//! Config schema for the scraping service.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrawlConfig {
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    pub worker: WorkerConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    pub port: u16,
    /// Value of the `X-Service` header attached to every response.
    pub service_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            service_name: "trawl".into(),
        }
    }
}

/// How browser sessions are obtained and shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// DevTools WebSocket URL of a remote browser (e.g. a browserless
    /// container). A local Chrome/Chromium is launched when unset.
    pub endpoint: Option<String>,
    /// Path to the Chrome/Chromium binary for local launches.
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    /// Timeout for a single CDP request, navigation included.
    pub navigation_timeout_ms: u64,
    /// Default user agent, overridable per request.
    pub user_agent: Option<String>,
    /// Extra Chrome command line arguments for local launches.
    pub chrome_args: Vec<String>,
    /// Domains that may be navigated to. Empty allows everything.
    /// `*.example.com` also matches `example.com`.
    pub allowed_domains: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            chrome_path: None,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            device_scale_factor: 1.0,
            navigation_timeout_ms: 30_000,
            user_agent: None,
            chrome_args: Vec::new(),
            allowed_domains: Vec::new(),
        }
    }
}

/// Background worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Upper bound on how long an idle worker waits before re-checking its queue.
    pub poll_interval_ms: u64,
    /// Delay before a faulted session is rebuilt.
    pub restart_backoff_ms: u64,
    /// Deadline for one job, navigation through capture.
    pub job_timeout_ms: u64,
    /// Settle delay before a screenshot is captured.
    pub screenshot_settle_ms: u64,
    /// Interval between element visibility checks while waiting.
    pub wait_poll_ms: u64,
    /// Maximum queued jobs per resource type. 0 = unbounded.
    pub max_queue_depth: usize,
    /// Jobs in a row that may end with the browser not answering before the
    /// session is rebuilt.
    pub max_consecutive_timeouts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            restart_backoff_ms: 1_000,
            job_timeout_ms: 20_000,
            screenshot_settle_ms: 1_000,
            wait_poll_ms: 100,
            max_queue_depth: 0,
            max_consecutive_timeouts: 3,
        }
    }
}

/// Result cache retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Synchronous (non-queued) scrape endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    /// Browser sessions that may be open at once for synchronous requests.
    pub max_concurrent_sessions: usize,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_sessions: 2,
            request_timeout_ms: 20_000,
        }
    }
}
