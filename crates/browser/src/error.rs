//! Browser error types.

use {chromiumoxide::error::CdpError, thiserror::Error};

/// Errors that can occur while driving a browser session.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("stale element: {0}")]
    StaleElement(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("JavaScript evaluation failed: {0}")]
    JsEvalFailed(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("browser unresponsive: {0}")]
    Unresponsive(String),

    #[error("cancelled")]
    Cancelled,

    #[error("browser closed unexpectedly")]
    BrowserClosed,

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("action {step} ({action}) failed: {source}")]
    ActionFailed {
        step: usize,
        action: String,
        #[source]
        source: Box<BrowserError>,
    },
}

impl BrowserError {
    /// The underlying error, looking through action wrappers.
    pub fn root(&self) -> &BrowserError {
        match self {
            Self::ActionFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// The session itself is unusable and has to be rebuilt.
    pub fn is_driver_fault(&self) -> bool {
        matches!(
            self.root(),
            Self::LaunchFailed(_) | Self::BrowserClosed | Self::ConnectionClosed(_)
        )
    }

    /// The browser stopped answering commands. One occurrence may be a slow
    /// page; a run of them means the session is wedged.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self.root(), Self::Unresponsive(_))
    }

    /// Worth polling again: the element is missing or was detached mid-lookup.
    pub fn is_transient(&self) -> bool {
        matches!(self.root(), Self::ElementNotFound(_) | Self::StaleElement(_))
    }

    /// Map a CDP error, keeping connection loss distinguishable from
    /// ordinary command failures.
    pub fn from_cdp(err: CdpError, otherwise: impl FnOnce(String) -> Self) -> Self {
        match err {
            CdpError::Ws(e) => Self::ConnectionClosed(e.to_string()),
            CdpError::ChannelSendError(_) => Self::ConnectionClosed("browser channel closed".into()),
            CdpError::NoResponse => Self::ConnectionClosed("no response from browser".into()),
            CdpError::Timeout => Self::Unresponsive("CDP request timed out".into()),
            other => {
                let message = other.to_string();
                if message.contains("AlreadyClosed") || message.contains("ConnectionClosed") {
                    Self::ConnectionClosed(message)
                } else {
                    otherwise(message)
                }
            },
        }
    }
}

impl From<CdpError> for BrowserError {
    fn from(err: CdpError) -> Self {
        Self::from_cdp(err, BrowserError::Cdp)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_faults() {
        assert!(BrowserError::ConnectionClosed("ws".into()).is_driver_fault());
        assert!(BrowserError::BrowserClosed.is_driver_fault());
        assert!(BrowserError::LaunchFailed("no chrome".into()).is_driver_fault());
        assert!(!BrowserError::NavigationFailed("dns".into()).is_driver_fault());
        assert!(!BrowserError::Timeout("slow".into()).is_driver_fault());
    }

    #[test]
    fn wrapped_errors_keep_their_class() {
        let err = BrowserError::ActionFailed {
            step: 2,
            action: "click_button(//button)".into(),
            source: Box::new(BrowserError::ConnectionClosed("gone".into())),
        };
        assert!(err.is_driver_fault());
        assert_eq!(
            err.to_string(),
            "action 2 (click_button(//button)) failed: connection closed: gone"
        );
    }

    #[test]
    fn transient_errors() {
        assert!(BrowserError::ElementNotFound("#x".into()).is_transient());
        assert!(BrowserError::StaleElement("#x".into()).is_transient());
        assert!(!BrowserError::InvalidSelector("[".into()).is_transient());
    }

    #[test]
    fn cdp_timeout_is_unresponsive_but_not_a_fault() {
        let err = BrowserError::from(CdpError::Timeout);
        assert!(matches!(err, BrowserError::Unresponsive(_)));
        assert!(err.is_unresponsive());
        assert!(!err.is_driver_fault());
    }

    #[test]
    fn element_wait_timeout_is_not_unresponsive() {
        let err = BrowserError::ActionFailed {
            step: 0,
            action: "wait_for_element(#go)".into(),
            source: Box::new(BrowserError::Timeout("#go not visible".into())),
        };
        assert!(!err.is_unresponsive());
    }

    #[test]
    fn cdp_no_response_is_a_fault() {
        assert!(BrowserError::from(CdpError::NoResponse).is_driver_fault());
    }
}
