//! Scrubbing of backend diagnostics before they are shown or retained.
//!
//! Backend log lines routinely carry session and bot identifiers. None of them
//! mean anything to the person in the meeting, so they are stripped here.

use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    session_id: Regex,
    bot_id: Regex,
    session_created: Regex,
    bracketed_uuid: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        session_id: Regex::new(r"(?i)session_id[:\s]+[A-Za-z0-9_-]+").expect("valid regex"),
        bot_id: Regex::new(r"(?i)bot_id[:\s]+[A-Za-z0-9_-]+").expect("valid regex"),
        session_created: Regex::new(r"(?i)Session created[:\s]+[A-Za-z0-9_-]+")
            .expect("valid regex"),
        bracketed_uuid: Regex::new(r"\[[A-Za-z0-9_-]{36}\]").expect("valid regex"),
    })
}

fn sanitize_pass(input: &str) -> String {
    let patterns = patterns();
    let text = patterns.session_id.replace_all(input, "");
    let text = patterns.bot_id.replace_all(&text, "");
    let text = patterns
        .session_created
        .replace_all(&text, "Session created");
    let text = patterns.bracketed_uuid.replace_all(&text, "");
    text.into_owned()
}

/// Removes identifier tokens from `raw` and trims the result.
///
/// Every substitution shortens the text, so repeating passes until nothing
/// changes terminates and makes the function idempotent.
pub fn sanitize(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current.trim().to_string();
        }
        current = next;
    }
}

/// Coarse status implied by a sanitized log line, if any.
pub fn derive_status(line: &str) -> Option<&'static str> {
    if line.contains("Bot joined") {
        Some("Recording active")
    } else if line.contains("Recording started") {
        Some("Recording in progress")
    } else {
        None
    }
}
