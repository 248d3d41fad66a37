//! Raw RFC 822 → [`Message`] extraction.

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::pipeline::types::Message;

/// Maximum characters kept from the body.
pub const EXCERPT_MAX_CHARS: usize = 2000;

/// Parse a raw message. `fallback_received` is used when the `Date` header
/// is missing or unparseable. Returns `None` if the bytes are not a message.
pub fn parse_raw_message(
    id: &str,
    raw: &[u8],
    fallback_received: DateTime<Utc>,
) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or(fallback_received);

    Some(Message {
        id: id.to_string(),
        sender: extract_sender(&parsed),
        subject: parsed.subject().unwrap_or_default().to_string(),
        body_excerpt: truncate_chars(&extract_text(&parsed), EXCERPT_MAX_CHARS),
        received_at,
    })
}

/// Strip HTML tags and decode the common entities.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    let text = result
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cut at a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into())
}

/// text/plain first, then HTML, then any textual attachment. Empty when the
/// message has no readable part (calendar invites and the like).
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}
