//! Per-request CSP nonce.
//!
//! The nonce is generated once per request, before any header or HTML is
//! produced, and scopes which inline `<script>`/`<style>` blocks the
//! Content-Security-Policy permits.

use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use rand::{thread_rng, RngCore};
use regex::Regex;

/// Raw random bytes per nonce (128 bits).
const NONCE_BYTES_LEN: usize = 16;

static SCRIPT_OR_STYLE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(script|style)\b").expect("static regex"));

/// Generate a fresh base64 nonce.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES_LEN];
    thread_rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Attach `nonce` to every `<script>` and `<style>` tag and expose it in a
/// `csp-nonce` meta tag before `</head>`.
pub fn inject_nonce_into_html(html: &str, nonce: &str) -> String {
    let tagged = SCRIPT_OR_STYLE_TAG.replace_all(html, |caps: &regex::Captures<'_>| {
        format!("<{} nonce=\"{}\"", &caps[1], nonce)
    });

    let meta = format!("<meta name=\"csp-nonce\" content=\"{}\">", nonce);
    inject_before_head_close(&tagged, &meta)
}

/// Insert `snippet` right before `</head>`, or leave the document unchanged
/// when it has no head.
pub fn inject_before_head_close(html: &str, snippet: &str) -> String {
    match html.find("</head>") {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + snippet.len() + 1);
            out.push_str(&html[..idx]);
            out.push_str(snippet);
            out.push('\n');
            out.push_str(&html[idx..]);
            out
        }
        None => html.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_generation() {
        let nonce1 = generate_nonce();
        let nonce2 = generate_nonce();
        assert_ne!(nonce1, nonce2);

        let decoded = STANDARD.decode(&nonce1).unwrap();
        assert_eq!(decoded.len(), NONCE_BYTES_LEN);
    }

    #[test]
    fn test_inject_into_tags_and_head() {
        let html = "<html><head><style>a{}</style></head><body><SCRIPT src=\"/scripts/app.js\"></SCRIPT></body></html>";
        let out = inject_nonce_into_html(html, "abc123");

        assert!(out.contains("<style nonce=\"abc123\">"));
        assert!(out.contains("<SCRIPT nonce=\"abc123\" src="));
        assert!(out.contains("<meta name=\"csp-nonce\" content=\"abc123\">\n</head>"));
    }

    #[test]
    fn test_document_without_head() {
        let out = inject_nonce_into_html("<p>hi</p>", "n");
        assert_eq!(out, "<p>hi</p>");
    }
}
