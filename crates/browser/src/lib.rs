//! Scrape-action interpreter and browser sessions.
//!
//! A [`Scraper`] runs one [`ScrapeRequest`] against a [`BrowserSession`]:
//! it navigates, executes the request's [`ScrapeAction`]s in order through an
//! [`ActionExecutor`], then captures page source or a screenshot. Sessions
//! come from a [`SessionProvider`]; [`CdpSessionProvider`] drives
//! Chrome/Chromium over the DevTools protocol, either launched locally or
//! reached at a remote WebSocket endpoint.
//!
//! # Example
//!
//! ```ignore
//! use trawl_browser::{CdpSessionProvider, ResourceType, ScrapeRequest, Scraper, SessionProvider};
//!
//! let provider = CdpSessionProvider::new(Default::default());
//! let session = provider.open().await?;
//! let request = ScrapeRequest::new("https://example.com", ResourceType::PageSource);
//! let outcome = Scraper::default()
//!     .scrape(session.as_ref(), JobId::new(), &request, &CancellationToken::new())
//!     .await;
//! ```

pub mod cdp;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod pretty;
pub mod selector;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;
pub mod validate;

pub use {
    cdp::CdpSessionProvider,
    error::BrowserError,
    executor::ActionExecutor,
    orchestrator::{ScrapeOutcome, Scraper, ScraperConfig},
    selector::Selector,
    session::{BrowserSession, SessionProvider},
    types::{
        BrowserConfig, HttpHeader, ResourceType, ScrapeAction, ScrapeRequest, ScrapeResponse,
        ScrapeStatus,
    },
};
