use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use bulkreg_core::{Token, TokenKind};

use crate::message::ParsedMessage;

static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// Elements a mail template typically puts a verification code in
const CODE_CONTAINERS: &str = "td, div, span, p, strong, b, font, h1, h2, h3";

/// Text inside these elements is never rendered
const HIDDEN_ELEMENTS: &[&str] = &["style", "script", "head", "title"];

/// Locate a token of the given kind in a message body (HTML or plain text).
pub fn extract(body: &str, kind: &TokenKind) -> Option<Token> {
    if body.trim().is_empty() {
        return None;
    }
    let token = match kind {
        TokenKind::LinkParameter { name, host } => extract_link_parameter(body, name, host.as_deref()),
        TokenKind::NumericCode { digits, accent } => extract_numeric_code(body, *digits, accent.as_deref()),
    };
    if let Some(ref t) = token {
        debug!(token_len = t.as_str().len(), "token_extracted");
    }
    token
}

/// Try the HTML body first, then the plain text body.
pub fn extract_from_message(message: &ParsedMessage, kind: &TokenKind) -> Option<Token> {
    message
        .html
        .as_deref()
        .and_then(|html| extract(html, kind))
        .or_else(|| message.text.as_deref().and_then(|text| extract(text, kind)))
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn extract_link_parameter(body: &str, name: &str, host: Option<&str>) -> Option<Token> {
    if name.is_empty() {
        return None;
    }

    let document = Html::parse_document(body);
    if let Some(sel) = selector("a[href]") {
        for el in document.select(&sel) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            if host.is_some_and(|h| !href.contains(h)) {
                continue;
            }
            if let Some(value) = query_value(href, name) {
                return Some(Token(value));
            }
        }
    }

    // Anchors can be mangled by mail clients; scan the raw body
    let pattern = format!(r#"[?&](?:amp;)?{}=([^&\s"'<>#]+)"#, regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let found = re
        .captures_iter(body)
        .filter(|caps| match host {
            Some(h) => caps.get(0).is_some_and(|m| enclosing_url(body, m.start(), m.end()).contains(h)),
            None => true,
        })
        .find_map(|caps| caps.get(1).and_then(|m| decode_component(name, m.as_str())))
        .map(Token);
    found
}

/// Text from the last whitespace or quoting character before `start` up to `end`
fn enclosing_url(body: &str, start: usize, end: usize) -> &str {
    let is_boundary = |c: char| c.is_whitespace() || matches!(c, '"' | '\'' | '<' | '>' | '(' | ')');
    let from = body[..start]
        .rfind(is_boundary)
        .map(|i| i + body[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    &body[from..end]
}

/// Value of query parameter `name` in `href`, percent-decoded
fn query_value(href: &str, name: &str) -> Option<String> {
    let (_, query) = href.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

fn decode_component(name: &str, raw: &str) -> Option<String> {
    query_value(&format!("?{}={}", name, raw), name)
}

fn extract_numeric_code(body: &str, digits: usize, accent: Option<&str>) -> Option<Token> {
    if digits == 0 {
        return None;
    }

    let document = Html::parse_document(body);
    let accent = accent.map(normalize_style);

    if let Some(sel) = selector(CODE_CONTAINERS) {
        for el in document.select(&sel) {
            if !is_emphasized(&el, accent.as_deref()) {
                continue;
            }
            let text = el.text().collect::<String>();
            let text = text.trim();
            if is_code(text, digits) {
                return Some(Token(text.to_string()));
            }
        }
    }

    let visible = if looks_like_html(body) {
        visible_text(&document)
    } else {
        body.to_string()
    };
    DIGIT_RUN_RE
        .find_iter(&visible)
        .map(|m| m.as_str())
        .find(|run| run.len() == digits)
        .map(|run| Token(run.to_string()))
}

fn is_emphasized(el: &ElementRef, accent: Option<&str>) -> bool {
    let style = el.value().attr("style").map(normalize_style).unwrap_or_default();
    let centered = style.contains("text-align:center")
        || el.value().attr("align").is_some_and(|a| a.eq_ignore_ascii_case("center"));
    if !centered {
        return false;
    }
    match accent {
        Some(color) => style.contains(&format!("color:{}", color)),
        None => true,
    }
}

fn is_code(text: &str, digits: usize) -> bool {
    text.len() == digits && text.bytes().all(|b| b.is_ascii_digit())
}

fn normalize_style(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_lowercase()
}

fn looks_like_html(body: &str) -> bool {
    body.contains('<') && body.contains('>')
}

fn visible_text(document: &Html) -> String {
    let mut parts = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            parts.push(String::from(&**text));
        }
    }
    parts.join(" ")
}
