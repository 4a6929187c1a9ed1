//! Scrubbing of credential material from text that may end up in logs
//!
//! Applied to every error message the transport produces and to captured
//! error response bodies.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

pub const REDACTED: &str = "[REDACTED]";

static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Authorization: <scheme> <credentials>, "authorization": "...";
        // unquoted values run to the end of the line
        (
            r#"(?i)("?\bauthorization"?\s*[:=]\s*)(?:"(?:[^"\\]|\\.)*"?|[^\r\n"']+)"#,
            "${1}[REDACTED]",
        ),
        (r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+", "Bearer [REDACTED]"),
        // "accessJwt": "...", refresh_token=..., password: ...
        // A quoted value is taken whole, even when cut off before its closing quote
        (
            r#"(?i)("?\b(?:access_?jwt|refresh_?jwt|access_?token|refresh_?token|id_?token|token|password|secret)"?\s*[:=]\s*)(?:"(?:[^"\\]|\\.)*"?|[^\s,&}"]+)"#,
            "${1}[REDACTED]",
        ),
        // Anything shaped like a JWT
        (
            r"eyJ[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)?",
            REDACTED,
        ),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("redaction pattern must compile"),
            replacement,
        )
    })
    .collect()
});

/// Replace credential-bearing substrings with `[REDACTED]`
pub fn redact(text: &str) -> String {
    let mut result = Cow::Borrowed(text);
    for (pattern, replacement) in PATTERNS.iter() {
        if let Cow::Owned(replaced) = pattern.replace_all(&result, *replacement) {
            result = Cow::Owned(replaced);
        }
    }
    result.into_owned()
}
