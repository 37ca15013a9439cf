//! Request context and inbound request handling.
//!
//! # Responsibilities
//! - Resolve the client address (direct peer or last proxy hop)
//! - Classify the route so guards can pick their rate-limit scope
//! - Parse query strings and JSON/form bodies into structured values
//! - Hand the sanitized result to handlers through extractors
//!
//! # Design Decisions
//! - The context lives for one request and is never shared
//! - Body size limits are enforced before the body is read in full
//! - Handlers read the sanitized body, never the raw bytes

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap, Method},
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::security::csrf::CsrfState;
use crate::security::rate_limit::RateLimitInfo;

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Coarse route classification used by the admission guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// HTML page (`GET /`).
    Page,
    /// Login and registration attempts.
    Auth,
    /// Contact form submission.
    Contact,
    /// Multipart file upload.
    Upload,
    /// CSP violation report.
    CspReport,
    Other,
}

impl RouteClass {
    pub fn classify(method: &Method, path: &str) -> Self {
        let post = method == Method::POST;
        match path {
            "/" if method == Method::GET || method == Method::HEAD => RouteClass::Page,
            "/api/auth/login" | "/api/auth/register" if post => RouteClass::Auth,
            "/api/contact" if post => RouteClass::Contact,
            "/api/uploads" if post => RouteClass::Upload,
            "/api/csp-report" => RouteClass::CspReport,
            _ => RouteClass::Other,
        }
    }
}

/// Per-request state threaded through the security pipeline.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub client_ip: IpAddr,
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    /// Query parameters; repeated keys become arrays.
    pub query: Map<String, Value>,
    /// Parsed body, an empty object when the body was not parsed.
    pub body: Value,
    /// Path parameters. No route declares any, so this stays empty.
    pub params: Map<String, Value>,
    pub nonce: String,
    pub route: RouteClass,
    pub csrf: Option<CsrfState>,
    pub session_id: Option<String>,
    pub rate_limit: Option<RateLimitInfo>,
    /// Slow-down delay decided by the admission stage.
    pub delay: Duration,
    /// An auth attempt was counted at admission and may be handed back.
    pub auth_counted: bool,
    /// The request passed every guard and reached its route.
    pub dispatched: bool,
}

impl RequestContext {
    pub fn new(parts: &Parts, trust_proxy: bool) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let path = parts.uri.path().to_string();

        Self {
            request_id: parts
                .headers
                .get(X_REQUEST_ID)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            client_ip: client_ip(&parts.headers, peer, trust_proxy),
            method: parts.method.clone(),
            route: RouteClass::classify(&parts.method, &path),
            path,
            headers: parts.headers.clone(),
            query: parse_query(parts.uri.query().unwrap_or("")),
            body: Value::Object(Map::new()),
            params: Map::new(),
            nonce: String::new(),
            csrf: None,
            session_id: None,
            rate_limit: None,
            delay: Duration::ZERO,
            auth_counted: false,
            dispatched: false,
        }
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// GET, HEAD and OPTIONS.
    pub fn is_safe_method(&self) -> bool {
        matches!(self.method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    /// POST, PUT, DELETE and PATCH.
    pub fn is_state_changing(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::DELETE | Method::PATCH
        )
    }

    /// Whether the request carries an `Authorization: Bearer` credential.
    pub fn has_bearer(&self) -> bool {
        self.header(header::AUTHORIZATION)
            .map(|v| v.len() > 7 && v[..7].eq_ignore_ascii_case("bearer "))
            .unwrap_or(false)
    }

    pub fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE).map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// Resolve the client address.
///
/// With `trust_proxy` the last `X-Forwarded-For` hop wins, matching a single
/// reverse proxy in front of the server.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get_all("x-forwarded-for")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|hop| hop.trim().parse::<IpAddr>().ok())
            .last();
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Parse `a=1&b=2&a=3` into `{a: ["1", "3"], b: "2"}`.
pub fn parse_query(raw: &str) -> Map<String, Value> {
    collect_pairs(url::form_urlencoded::parse(raw.as_bytes()))
}

fn collect_pairs<'a, I>(pairs: I) -> Map<String, Value>
where
    I: Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
{
    let mut map = Map::new();
    for (key, value) in pairs {
        let value = Value::String(value.into_owned());
        match map.get_mut(&*key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    map
}

/// What the body stage should do with a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Json,
    Form,
    /// Buffered and kept, not parsed (CSP reports).
    Opaque,
    /// Left untouched for a streaming handler (multipart uploads).
    Stream,
    /// Nothing to read.
    Empty,
}

/// Decide how the body stage treats the request.
pub fn body_kind(ctx: &RequestContext, exempt: bool) -> Result<BodyKind, AppError> {
    let content_type = ctx.content_type();
    let declared_len = ctx
        .header(header::CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok());
    let chunked = ctx.header(header::TRANSFER_ENCODING).is_some();

    if ctx.route == RouteClass::Upload
        && content_type.as_deref() == Some("multipart/form-data")
    {
        return Ok(BodyKind::Stream);
    }
    if ctx.route == RouteClass::CspReport {
        return Ok(BodyKind::Opaque);
    }

    match content_type.as_deref() {
        Some("application/json") => return Ok(BodyKind::Json),
        Some("application/x-www-form-urlencoded") => return Ok(BodyKind::Form),
        _ => {}
    }

    let has_body = declared_len.map(|n| n > 0).unwrap_or(chunked);
    if !has_body {
        return Ok(BodyKind::Empty);
    }
    if ctx.path.starts_with("/api/") && ctx.is_state_changing() && !exempt {
        return Err(AppError::UnsupportedMediaType(
            content_type.unwrap_or_else(|| "none".to_string()),
        ));
    }
    Ok(BodyKind::Opaque)
}

/// Buffer the body up to `limit` bytes and, for JSON and form bodies,
/// store the parsed value on the context.
pub async fn read_body(
    ctx: &mut RequestContext,
    body: Body,
    kind: BodyKind,
    limit: usize,
) -> Result<Bytes, AppError> {
    let declared_len = ctx
        .header(header::CONTENT_LENGTH)
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.map(|n| n > limit).unwrap_or(false) {
        return Err(AppError::PayloadTooLarge { max_bytes: limit });
    }

    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| AppError::PayloadTooLarge { max_bytes: limit })?;

    match kind {
        BodyKind::Json if !bytes.is_empty() => {
            ctx.body = serde_json::from_slice(&bytes)?;
        }
        BodyKind::Form => {
            ctx.body = Value::Object(collect_pairs(url::form_urlencoded::parse(&bytes)));
        }
        _ => {}
    }
    Ok(bytes)
}

/// Request facts produced by the pipeline and exposed to handlers.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: Option<String>,
    pub client_ip: IpAddr,
    pub nonce: String,
    pub csrf_token: Option<String>,
    pub session_id: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestMeta>()
            .cloned()
            .ok_or_else(|| AppError::Internal("request metadata missing".to_string()))
    }
}

/// The sanitized, parsed request body.
#[derive(Debug, Clone)]
pub struct ParsedBody(pub Value);

/// Extractor deserializing the sanitized body into `T`.
#[derive(Debug)]
pub struct SanitizedBody<T>(pub T);

impl<S, T> FromRequestParts<S> for SanitizedBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .extensions
            .get::<ParsedBody>()
            .map(|ParsedBody(v)| v.clone())
            .unwrap_or_else(|| Value::Object(Map::new()));
        serde_json::from_value(value)
            .map(SanitizedBody)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Request};

    fn parts(method: Method, uri: &str, headers: &[(&'static str, &'static str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5555))));
        parts
    }

    #[test]
    fn test_query_duplicates_become_arrays() {
        let query = parse_query("sort=a&sort=b&page=2&sort=c");
        assert_eq!(query["sort"], serde_json::json!(["a", "b", "c"]));
        assert_eq!(query["page"], "2");
    }

    #[test]
    fn test_client_ip_prefers_last_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 203.0.113.9"),
        );
        let peer = Some(SocketAddr::from(([10, 0, 0, 1], 80)));

        assert_eq!(
            client_ip(&headers, peer, true),
            "203.0.113.9".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            client_ip(&headers, peer, false),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_route_classification() {
        assert_eq!(RouteClass::classify(&Method::GET, "/"), RouteClass::Page);
        assert_eq!(
            RouteClass::classify(&Method::POST, "/api/auth/login"),
            RouteClass::Auth
        );
        assert_eq!(
            RouteClass::classify(&Method::POST, "/api/auth/logout"),
            RouteClass::Other
        );
        assert_eq!(
            RouteClass::classify(&Method::POST, "/api/uploads"),
            RouteClass::Upload
        );
    }

    #[test]
    fn test_unknown_content_type_on_api_is_rejected() {
        let ctx = RequestContext::new(
            &parts(
                Method::POST,
                "/api/contact",
                &[("content-type", "text/plain"), ("content-length", "5")],
            ),
            false,
        );
        assert!(matches!(
            body_kind(&ctx, false),
            Err(AppError::UnsupportedMediaType(_))
        ));
    }

    #[test]
    fn test_bearer_detection() {
        let ctx = RequestContext::new(
            &parts(Method::POST, "/api/x", &[("authorization", "Bearer abc.def")]),
            false,
        );
        assert!(ctx.has_bearer());
        assert_eq!(ctx.client_ip, "10.0.0.7".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let mut ctx = RequestContext::new(
            &parts(Method::POST, "/api/contact", &[("content-type", "application/json")]),
            false,
        );
        let body = Body::from(vec![b'a'; 64]);
        let err = read_body(&mut ctx, body, BodyKind::Json, 16).await.unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge { max_bytes: 16 }));
    }

    #[tokio::test]
    async fn test_form_body_is_parsed() {
        let mut ctx = RequestContext::new(
            &parts(
                Method::POST,
                "/api/contact",
                &[("content-type", "application/x-www-form-urlencoded")],
            ),
            false,
        );
        let body = Body::from("nombre=Ana&_csrf=tok");
        read_body(&mut ctx, body, BodyKind::Form, 1024).await.unwrap();
        assert_eq!(ctx.body["nombre"], "Ana");
        assert_eq!(ctx.body["_csrf"], "tok");
    }
}
