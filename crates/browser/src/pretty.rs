//! Re-indents captured HTML for human readers.

use {
    scraper::{ElementRef, Html, Node},
    thiserror::Error,
};

/// Deepest element nesting that will be re-indented.
pub const MAX_DEPTH: usize = 256;

/// Text children shorter than this stay on the line of their element.
const INLINE_TEXT_MAX: usize = 80;

const INDENT: &str = "  ";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Content is emitted untouched.
const VERBATIM_ELEMENTS: &[&str] = &["script", "style", "pre", "textarea"];

/// Text inside these is not HTML and must not be escaped.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Error)]
pub enum PrettyError {
    #[error("document nesting exceeds {limit} levels")]
    TooDeep { limit: usize },

    #[error("document is empty")]
    Empty,
}

/// Parse `html` and serialize it with one element per line, indented by
/// depth.
pub fn pretty_print(html: &str) -> Result<String, PrettyError> {
    if html.trim().is_empty() {
        return Err(PrettyError::Empty);
    }

    let document = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() + html.len() / 4);

    for node in document.tree.root().children() {
        if let Node::Doctype(doctype) = node.value() {
            out.push_str("<!DOCTYPE ");
            out.push_str(doctype.name());
            out.push_str(">\n");
        }
    }

    write_element(document.root_element(), 0, &mut out)?;
    Ok(out)
}

fn write_element(element: ElementRef<'_>, depth: usize, out: &mut String) -> Result<(), PrettyError> {
    if depth > MAX_DEPTH {
        return Err(PrettyError::TooDeep { limit: MAX_DEPTH });
    }

    let name = element.value().name();
    push_indent(out, depth);
    out.push('<');
    out.push_str(name);
    for (key, value) in element.value().attrs() {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&name) {
        out.push('\n');
        return Ok(());
    }

    if VERBATIM_ELEMENTS.contains(&name) {
        let raw_text = RAW_TEXT_ELEMENTS.contains(&name);
        for child in element.children() {
            match child.value() {
                Node::Text(text) if raw_text => out.push_str(text),
                Node::Text(text) => out.push_str(&escape_text(text)),
                Node::Comment(comment) => {
                    out.push_str("<!--");
                    out.push_str(comment);
                    out.push_str("-->");
                },
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        out.push_str(&child.html());
                    }
                },
                _ => {},
            }
        }
        push_close(out, name);
        return Ok(());
    }

    let children: Vec<_> = element
        .children()
        .filter(|child| match child.value() {
            Node::Text(text) => !text.trim().is_empty(),
            _ => true,
        })
        .collect();

    if let [only] = children.as_slice()
        && let Node::Text(text) = only.value()
    {
        let text = text.trim();
        if text.len() <= INLINE_TEXT_MAX && !text.contains('\n') {
            out.push_str(&escape_text(text));
            push_close(out, name);
            return Ok(());
        }
    }

    if children.is_empty() {
        push_close(out, name);
        return Ok(());
    }

    out.push('\n');
    for child in children {
        match child.value() {
            Node::Text(text) => {
                push_indent(out, depth + 1);
                out.push_str(&escape_text(text.trim()));
                out.push('\n');
            },
            Node::Comment(comment) => {
                push_indent(out, depth + 1);
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->\n");
            },
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    write_element(child, depth + 1, out)?;
                }
            },
            _ => {},
        }
    }
    push_indent(out, depth);
    push_close(out, name);
    Ok(())
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn push_close(out: &mut String, name: &str) {
    out.push_str("</");
    out.push_str(name);
    out.push_str(">\n");
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
