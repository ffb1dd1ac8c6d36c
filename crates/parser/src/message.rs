//! RFC 5322 message decoding.
//!
//! Verification mail arrives from many mail systems with inconsistent charset labels,
//! so body parts are decoded by trying the declared charset first and then a fixed
//! fallback list, keeping the first decode that loses nothing.

use std::borrow::Cow;

use encoding_rs::Encoding;
use mailparse::{parse_mail, DispositionType, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

/// Charsets tried after the declared one, in order
const FALLBACK_CHARSETS: &[&str] = &["utf-8", "gbk", "gb2312", "iso-8859-1"];

/// Decoded view of one mailbox message
#[derive(Debug, Default, Clone)]
pub struct ParsedMessage {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl ParsedMessage {
    pub fn subject_contains_any(&self, keywords: &[String]) -> bool {
        if keywords.is_empty() {
            return true;
        }
        let subject = self.subject.as_deref().unwrap_or_default().to_lowercase();
        keywords.iter().any(|k| subject.contains(&k.to_lowercase()))
    }

    pub fn has_body(&self) -> bool {
        self.text.is_some() || self.html.is_some()
    }
}

/// Decode raw message bytes. Returns `None` when the message structure is unreadable.
pub fn parse_message(raw: &[u8]) -> Option<ParsedMessage> {
    let mail = match parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            warn!(error = %e, raw_len = raw.len(), "message_parse_failed");
            return None;
        }
    };

    let mut parsed = ParsedMessage {
        subject: mail.headers.get_first_value("Subject"),
        from: mail.headers.get_first_value("From"),
        to: mail.headers.get_first_value("To"),
        ..Default::default()
    };
    collect_bodies(&mail, &mut parsed);

    debug!(
        subject = ?parsed.subject,
        has_text = parsed.text.is_some(),
        has_html = parsed.html.is_some(),
        "message_parsed"
    );
    Some(parsed)
}

/// First text/plain and first text/html leaf win; attachments are skipped.
fn collect_bodies(part: &ParsedMail, out: &mut ParsedMessage) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_bodies(sub, out);
        }
        return;
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    let slot = match part.ctype.mimetype.as_str() {
        "text/html" => &mut out.html,
        "text/plain" => &mut out.text,
        _ => return,
    };
    if slot.is_some() {
        return;
    }

    let raw = match part.get_body_raw() {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, mimetype = %part.ctype.mimetype, "message_body_decode_failed");
            return;
        }
    };
    let body = decode_body(&raw, &part.ctype.charset);
    if !body.trim().is_empty() {
        *slot = Some(body);
    }
}

/// Decode body bytes, trying `declared` and then the fallback charsets.
/// The first lossless decode wins; if none is lossless the UTF-8 decode is lossy.
pub fn decode_body(raw: &[u8], declared: &str) -> String {
    let declared = declared.trim().to_lowercase();
    let declared = (!declared.is_empty() && declared != "us-ascii").then_some(declared);

    for label in declared.iter().map(String::as_str).chain(FALLBACK_CHARSETS.iter().copied()) {
        let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
            continue;
        };
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(raw) {
            return text.into_owned();
        }
    }

    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}
