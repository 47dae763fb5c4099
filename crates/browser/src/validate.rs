//! Client input checks, run before any browser interaction.

use url::Url;

use crate::{
    error::BrowserError,
    selector::Selector,
    types::{ScrapeAction, ScrapeRequest},
};

/// Parse `raw` and require an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url, BrowserError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(BrowserError::InvalidUrl("URL cannot be empty".into()));
    }

    let parsed = Url::parse(raw).map_err(|e| {
        BrowserError::InvalidUrl(format!(
            "'{}' is not an absolute URL ({e}), e.g. 'https://www.example.com'",
            truncate(raw)
        ))
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BrowserError::InvalidUrl(format!(
            "unsupported URL scheme '{}', only http/https allowed",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(BrowserError::InvalidUrl(format!(
            "'{}' has no host",
            truncate(raw)
        )));
    }
    Ok(parsed)
}

/// Whether `url`'s host is covered by `allowed_domains`.
///
/// An empty list allows everything. `*.example.com` matches subdomains and
/// `example.com` itself.
pub fn is_domain_allowed(url: &Url, allowed_domains: &[String]) -> bool {
    if allowed_domains.is_empty() {
        return true;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();

    allowed_domains.iter().any(|pattern| {
        let pattern = pattern.trim().to_ascii_lowercase();
        match pattern.strip_prefix("*.") {
            Some(base) => host == base || host.ends_with(&format!(".{base}")),
            None => host == pattern,
        }
    })
}

/// Validate a URL that is about to be loaded.
pub fn check_navigation(raw: &str, allowed_domains: &[String]) -> Result<Url, BrowserError> {
    let url = validate_url(raw)?;
    if !is_domain_allowed(&url, allowed_domains) {
        return Err(BrowserError::InvalidUrl(format!(
            "domain '{}' is not in the allowed list",
            url.host_str().unwrap_or_default()
        )));
    }
    Ok(url)
}

/// Validate a whole request: target URL, action payloads and headers.
pub fn validate_request(
    request: &ScrapeRequest,
    allowed_domains: &[String],
) -> Result<(), BrowserError> {
    check_navigation(&request.url, allowed_domains)?;

    for (i, action) in request.actions.iter().enumerate() {
        validate_action(action, allowed_domains).map_err(|e| BrowserError::ActionFailed {
            step: i + 1,
            action: action.to_string(),
            source: Box::new(e),
        })?;
    }

    if let Some(header) = request.headers.iter().find(|h| h.name.trim().is_empty()) {
        return Err(BrowserError::InvalidAction(format!(
            "header with value '{}' has an empty name",
            header.value
        )));
    }
    Ok(())
}

fn validate_action(action: &ScrapeAction, allowed_domains: &[String]) -> Result<(), BrowserError> {
    match action {
        ScrapeAction::Sleep { .. } => Ok(()),
        ScrapeAction::WaitForElement { selector, .. }
        | ScrapeAction::SetInputElement { selector, .. }
        | ScrapeAction::ClickButton { selector, .. } => Selector::parse(selector).map(|_| ()),
        ScrapeAction::SetBrowserSize { width, height } => {
            if *width == 0 || *height == 0 {
                Err(BrowserError::InvalidAction(format!(
                    "browser size {width}x{height} must be non-zero"
                )))
            } else {
                Ok(())
            }
        },
        ScrapeAction::NavigateTo { url } => check_navigation(url, allowed_domains).map(|_| ()),
    }
}

/// Truncate a URL for error messages.
fn truncate(url: &str) -> String {
    match url.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &url[..idx]),
        None => url.to_string(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::ResourceType, rstest::rstest};

    #[rstest]
    #[case("https://example.com")]
    #[case("http://localhost:8080/path?q=1")]
    #[case("  https://www.lemonde.fr/  ")]
    fn accepts_absolute_http(#[case] url: &str) {
        assert!(validate_url(url).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("www.google.com")]
    #[case("google.com")]
    #[case("google")]
    #[case("/relative/path")]
    #[case("ftp://example.com")]
    #[case("file:///etc/passwd")]
    #[case("javascript:alert(1)")]
    fn rejects_non_absolute_or_foreign(#[case] url: &str) {
        assert!(matches!(validate_url(url), Err(BrowserError::InvalidUrl(_))));
    }

    fn allowed(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn domain_allow_list() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(is_domain_allowed(&url("https://evil.com"), &[]));

        let exact = allowed(&["example.com"]);
        assert!(is_domain_allowed(&url("https://example.com/a"), &exact));
        assert!(!is_domain_allowed(&url("https://sub.example.com"), &exact));

        let wildcard = allowed(&["*.example.com"]);
        assert!(is_domain_allowed(&url("https://a.b.example.com"), &wildcard));
        assert!(is_domain_allowed(&url("https://EXAMPLE.com"), &wildcard));
        assert!(!is_domain_allowed(&url("https://notexample.com"), &wildcard));
    }

    #[test]
    fn request_with_bad_action_names_the_step() {
        let req = ScrapeRequest::new("https://example.com", ResourceType::PageSource).with_actions(vec![
            ScrapeAction::Sleep { duration_ms: 10 },
            ScrapeAction::SetBrowserSize {
                width: 0,
                height: 600,
            },
        ]);
        let err = validate_request(&req, &[]).unwrap_err();
        assert!(err.to_string().starts_with("action 2 (set_browser_size(0x600))"));
    }

    #[test]
    fn navigate_to_respects_allow_list() {
        let req = ScrapeRequest::new("https://example.com", ResourceType::PageSource).with_actions(
            vec![ScrapeAction::NavigateTo {
                url: "https://elsewhere.org".into(),
            }],
        );
        assert!(validate_request(&req, &[]).is_ok());
        assert!(validate_request(&req, &allowed(&["example.com"])).is_err());
    }

    #[test]
    fn empty_selector_is_rejected() {
        let req = ScrapeRequest::new("https://example.com", ResourceType::PageSource).with_actions(
            vec![ScrapeAction::ClickButton {
                selector: " ".into(),
                timeout_ms: 0,
            }],
        );
        assert!(validate_request(&req, &[]).is_err());
    }

    #[test]
    fn truncates_long_urls() {
        let long = format!("https://example.com/{}", "a".repeat(200));
        assert_eq!(truncate(&long).chars().count(), 103);
    }
}
