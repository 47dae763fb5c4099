//! Selector sanitization and dialect resolution.
//!
//! Selectors arrive either as descendant XPath expressions (`//div[@id="x"]`)
//! or as something else. Anything not starting with `//` is tagged with
//! [`NATIVE_MARKER`] so it is never fed to the XPath engine as-is; the marker
//! is resolved by [`Selector::parse`] into the dialect the browser speaks
//! natively.

use std::fmt;

use crate::error::BrowserError;

/// Prefix applied to selectors that are not descendant XPath expressions.
pub const NATIVE_MARKER: &str = "xpath=";

/// Tag a raw selector with [`NATIVE_MARKER`] unless it starts with `//`.
pub fn sanitize_selector(raw: &str) -> String {
    if raw.starts_with("//") {
        raw.to_string()
    } else {
        format!("{NATIVE_MARKER}{raw}")
    }
}

/// Escape interior double quotes for dialects that delimit with `"`.
pub fn escape_double_quotes(raw: &str) -> String {
    raw.replace('"', "\\\"")
}

/// A selector resolved to the dialect used to query the DOM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    XPath(String),
    Css(String),
}

impl Selector {
    /// Sanitize `raw` and resolve it.
    ///
    /// Marked selectors that still look like path expressions (`/html/body`,
    /// `(//a)[2]`, `./span`) stay XPath, everything else is CSS.
    pub fn parse(raw: &str) -> Result<Self, BrowserError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BrowserError::InvalidSelector("selector is empty".into()));
        }

        let sanitized = sanitize_selector(raw);
        let Some(native) = sanitized.strip_prefix(NATIVE_MARKER) else {
            return Ok(Self::XPath(sanitized));
        };

        let native = native.trim_start_matches(NATIVE_MARKER).trim();
        if native.is_empty() {
            return Err(BrowserError::InvalidSelector(format!(
                "nothing after '{NATIVE_MARKER}'"
            )));
        }

        if native.starts_with('/') || native.starts_with("(/") || native.starts_with("./") {
            Ok(Self::XPath(native.to_string()))
        } else {
            Ok(Self::Css(native.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::XPath(s) | Self::Css(s) => s,
        }
    }

    pub fn dialect(&self) -> &'static str {
        match self {
            Self::XPath(_) => "xpath",
            Self::Css(_) => "css",
        }
    }

    /// The selector as a double-quoted JavaScript string literal.
    pub fn to_js_literal(&self) -> String {
        format!(
            "\"{}\"",
            escape_double_quotes(&self.as_str().replace('\\', "\\\\"))
                .replace('\n', "\\n")
                .replace('\r', "\\r")
        )
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dialect(), self.as_str())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("//*[@id=\"missing\"]", "//*[@id=\"missing\"]")]
    #[case("//button", "//button")]
    #[case("#search", "xpath=#search")]
    #[case("/html/body/div[1]", "xpath=/html/body/div[1]")]
    #[case("input[name=q]", "xpath=input[name=q]")]
    fn sanitize(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_selector(raw), expected);
    }

    #[rstest]
    #[case("//a[@href]", Selector::XPath("//a[@href]".into()))]
    #[case("/html/body/form/input", Selector::XPath("/html/body/form/input".into()))]
    #[case("(//li)[3]", Selector::XPath("(//li)[3]".into()))]
    #[case("#go", Selector::Css("#go".into()))]
    #[case("div.result > a", Selector::Css("div.result > a".into()))]
    #[case("xpath=.nav", Selector::Css(".nav".into()))]
    fn parse_resolves_dialect(#[case] raw: &str, #[case] expected: Selector) {
        assert_eq!(Selector::parse(raw).unwrap(), expected);
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(matches!(
            Selector::parse("   "),
            Err(BrowserError::InvalidSelector(_))
        ));
        assert!(matches!(
            Selector::parse("xpath="),
            Err(BrowserError::InvalidSelector(_))
        ));
    }

    #[test]
    fn escapes_interior_quotes() {
        assert_eq!(
            escape_double_quotes(r#"//*[@id="q"]"#),
            r#"//*[@id=\"q\"]"#
        );
        assert_eq!(escape_double_quotes("plain"), "plain");
    }

    #[test]
    fn js_literal_round_trips_through_json() {
        let sel = Selector::parse(r#"//input[@value="a\b"]"#).unwrap();
        let literal = sel.to_js_literal();
        let decoded: String = serde_json::from_str(&literal).unwrap();
        assert_eq!(decoded, sel.as_str());
    }

    #[test]
    fn display_names_dialect() {
        assert_eq!(Selector::parse("#go").unwrap().to_string(), "css:#go");
    }
}
