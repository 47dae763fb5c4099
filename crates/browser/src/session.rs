//! The browser session seam.
//!
//! Workers and the synchronous endpoints only talk to a [`BrowserSession`];
//! [`crate::cdp`] provides the Chrome DevTools implementation and
//! [`crate::testing`] a scripted one.

use async_trait::async_trait;

use crate::{error::BrowserError, selector::Selector, types::HttpHeader};

/// One browser tab, driven step by step.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Override the user agent for subsequent page loads.
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError>;

    /// Send `headers` with every subsequent request. Replaces earlier headers.
    async fn set_extra_headers(&self, headers: &[HttpHeader]) -> Result<(), BrowserError>;

    /// Load `url` and wait for the load to finish.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Whether the element exists and is displayed.
    ///
    /// Returns `Ok(false)` for a present but hidden element and
    /// `ElementNotFound`/`StaleElement` when it cannot be resolved.
    async fn is_element_visible(&self, selector: &Selector) -> Result<bool, BrowserError>;

    /// Clear the element and type `value` into it.
    async fn set_input_value(&self, selector: &Selector, value: &str) -> Result<(), BrowserError>;

    async fn click(&self, selector: &Selector) -> Result<(), BrowserError>;

    /// Resize the viewport.
    async fn resize(&self, width: u32, height: u32) -> Result<(), BrowserError>;

    /// Serialized DOM of the current page.
    async fn page_source(&self) -> Result<String, BrowserError>;

    /// PNG bytes of the viewport, or of the whole document when `full_page`.
    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>, BrowserError>;

    /// Release the underlying browser. Errors are not actionable.
    async fn close(&self);
}

/// Opens fresh sessions, e.g. at worker start and after a driver fault.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}
