//! Input sanitization and injection pattern detection.
//!
//! # Responsibilities
//! - Neutralize NoSQL operator keys (`$where`, `a.b`) in body and query
//! - Reject HTTP parameter pollution outside an allow-list
//! - Reject any string value matching a known injection signature
//! - Provide text/email/filename/URL helpers for route handlers
//!
//! # Design Decisions
//! - Structural sanitization rewrites; pattern detection rejects
//! - Every substitution and every hit is logged on the security channel

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::AppError;
use crate::http::request::RequestContext;
use crate::observability::audit::{AuditLog, Level};
use crate::security::pipeline::Guard;

/// Query keys that may legitimately repeat.
pub const HPP_ALLOW_LIST: &[&str] = &["sort", "filter", "page", "limit"];

/// Message returned when pattern detection rejects a request.
pub const DISALLOWED_INPUT: &str = "Input contains disallowed characters";

struct Signature {
    name: &'static str,
    regex: Regex,
}

static SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    [
        ("sql_quote_or_comment", r"(?i)(%27)|(')|(--)|(%23)|(#)"),
        ("script_tag", r"(?is)<script[^>]*>.*?</script>"),
        ("javascript_uri", r"(?i)javascript:"),
        ("event_handler", r"(?i)on[A-Za-z0-9_]+\s*="),
        ("shell_metacharacter", r"[|;&$()`<>]"),
    ]
    .into_iter()
    .map(|(name, pattern)| Signature {
        name,
        regex: Regex::new(pattern).expect("static regex"),
    })
    .collect()
});

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));
static EMAIL_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_@.\-]").expect("static regex"));
static FILENAME_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._\-]").expect("static regex"));
static REPEATED_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").expect("static regex"));

/// Name of the first signature `value` matches.
pub fn find_dangerous_pattern(value: &str) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|sig| sig.regex.is_match(value))
        .map(|sig| sig.name)
}

/// Walk `value` and return the path and signature of the first hit.
fn scan(value: &Value, path: &str) -> Option<(String, &'static str)> {
    match value {
        Value::String(s) => find_dangerous_pattern(s).map(|p| (path.to_string(), p)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| scan(item, &format!("{}[{}]", path, i))),
        Value::Object(map) => map
            .iter()
            .find_map(|(key, item)| scan(item, &format!("{}.{}", path, key))),
        _ => None,
    }
}

fn needs_neutralizing(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Replace `$` and `.` in offending keys with `_`, recursively. Returns the
/// original names of every rewritten key.
pub fn neutralize_keys(value: &mut Value) -> Vec<String> {
    let mut replaced = Vec::new();
    neutralize_into(value, &mut replaced);
    replaced
}

fn neutralize_into(value: &mut Value, replaced: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            neutralize_map(map, replaced);
        }
        Value::Array(items) => {
            for item in items {
                neutralize_into(item, replaced);
            }
        }
        _ => {}
    }
}

fn neutralize_map(map: &mut Map<String, Value>, replaced: &mut Vec<String>) {
    let offending: Vec<String> = map.keys().filter(|k| needs_neutralizing(k)).cloned().collect();
    for key in offending {
        if let Some(inner) = map.remove(&key) {
            map.insert(key.replace(['$', '.'], "_"), inner);
            replaced.push(key);
        }
    }
    for inner in map.values_mut() {
        neutralize_into(inner, replaced);
    }
}

/// Rewrites NoSQL operator keys in the body and query.
pub struct NoSqlSanitizeGuard {
    audit: AuditLog,
}

impl NoSqlSanitizeGuard {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

impl Guard for NoSqlSanitizeGuard {
    fn name(&self) -> &'static str {
        "nosql_sanitize"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let mut replaced = neutralize_keys(&mut ctx.body);
        let mut query = Value::Object(std::mem::take(&mut ctx.query));
        replaced.extend(neutralize_keys(&mut query));
        if let Value::Object(map) = query {
            ctx.query = map;
        }

        for key in replaced {
            self.audit.security(
                Level::Warn,
                "INPUT_SANITIZED",
                json!({ "ip": ctx.client_ip.to_string(), "path": ctx.path, "key": key }),
            );
        }
        Ok(())
    }
}

/// Rejects repeated query keys that are not on the allow-list.
pub struct ParameterPollutionGuard {
    audit: AuditLog,
}

impl ParameterPollutionGuard {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

impl Guard for ParameterPollutionGuard {
    fn name(&self) -> &'static str {
        "parameter_pollution"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let polluted = ctx
            .query
            .iter()
            .find(|(key, value)| value.is_array() && !HPP_ALLOW_LIST.contains(&key.as_str()))
            .map(|(key, _)| key.clone());

        match polluted {
            Some(key) => {
                self.audit.security(
                    Level::Warn,
                    "PARAMETER_POLLUTION",
                    json!({ "ip": ctx.client_ip.to_string(), "path": ctx.path, "key": key }),
                );
                Err(AppError::BadRequest(format!(
                    "Duplicate query parameter: {}",
                    key
                )))
            }
            None => Ok(()),
        }
    }
}

/// Rejects requests whose body, query or params contain an injection
/// signature.
pub struct PatternGuard {
    audit: AuditLog,
}

impl PatternGuard {
    pub fn new(audit: AuditLog) -> Self {
        Self { audit }
    }
}

impl Guard for PatternGuard {
    fn name(&self) -> &'static str {
        "pattern_detection"
    }

    fn inspect(&self, ctx: &mut RequestContext) -> Result<(), AppError> {
        let hit = scan(&ctx.body, "body")
            .or_else(|| ctx.query.iter().find_map(|(k, v)| scan(v, &format!("query.{}", k))))
            .or_else(|| ctx.params.iter().find_map(|(k, v)| scan(v, &format!("params.{}", k))));

        match hit {
            Some((field, pattern)) => {
                self.audit.security(
                    Level::Error,
                    "DANGEROUS_PATTERN",
                    json!({
                        "ip": ctx.client_ip.to_string(),
                        "path": ctx.path,
                        "field": field,
                        "pattern": pattern,
                    }),
                );
                Err(AppError::BadRequest(DISALLOWED_INPUT.to_string()))
            }
            None => Ok(()),
        }
    }
}

/// Strip every HTML tag, keeping the text content.
pub fn sanitize_text(input: &str) -> String {
    HTML_TAG.replace_all(input, "").trim().to_string()
}

/// Trim, lowercase and drop characters outside `[A-Za-z0-9_@.-]`.
pub fn sanitize_email(input: &str) -> String {
    EMAIL_DISALLOWED
        .replace_all(&input.trim().to_lowercase(), "")
        .into_owned()
}

/// Safe file name: unusual characters become `_`, dot runs collapse, at most
/// 255 bytes.
pub fn sanitize_filename(input: &str) -> String {
    let replaced = FILENAME_DISALLOWED.replace_all(input, "_");
    let mut name = REPEATED_DOTS.replace_all(&replaced, ".").into_owned();
    name.truncate(255);
    name
}

/// Escape `& < > " ' /` for HTML contexts.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// The URL itself when it is absolute http(s), `#` otherwise.
pub fn sanitize_url(input: &str) -> String {
    match url::Url::parse(input) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => input.to_string(),
        _ => "#".to_string(),
    }
}
