//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, Response},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use nextstep_web::config::{AppConfig, Environment};
use nextstep_web::http::server::build_router;
use nextstep_web::observability::audit::MemorySink;
use nextstep_web::AppState;

pub const HOST: &str = "localhost:3000";
pub const ORIGIN: &str = "http://localhost:3000";
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0";
pub const PASSWORD: &str = "Str0ng!Passw0rd@";

/// Configuration suitable for tests: fast hashing, no delays, uploads in
/// `upload_dir`.
pub fn test_config(upload_dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = Environment::Test;
    config.secrets.jwt_secret = "test-jwt-secret-with-enough-entropy".to_string();
    config.secrets.session_secret = "test-session-secret-with-enough-entropy".to_string();
    config.secrets.cookie_secret = "test-cookie-secret-0123456789abcdef0123456789".to_string();
    config.auth.bcrypt_cost = 4;
    config.auth.failure_delay_ms = 0;
    config.slow_down.delay_ms = 0;
    config.slow_down.max_delay_ms = 0;
    config.upload.dir = upload_dir.to_string_lossy().into_owned();
    config.upload.max_file_bytes = 1024;
    config.web.root = web_root().to_string_lossy().into_owned();
    config
}

pub fn web_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("web")
}

/// A router over fresh state with a capturing audit log.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub sink: Arc<MemorySink>,
    pub upload_dir: TempDir,
    pub peer: SocketAddr,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let mut config = test_config(upload_dir.path());
        adjust(&mut config);

        let (sink, audit) = MemorySink::log();
        let state = AppState::new(config, audit);
        Self {
            router: build_router(state.clone()),
            state,
            sink,
            upload_dir,
            peer: "203.0.113.7:51000".parse().unwrap(),
        }
    }

    /// Request builder with the headers a same-origin browser sends.
    pub fn request(&self, method: Method, uri: &str) -> axum::http::request::Builder {
        let builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(header::HOST, HOST)
            .header(header::USER_AGENT, USER_AGENT);
        if method == Method::GET || method == Method::HEAD {
            builder
        } else {
            builder.header(header::ORIGIN, ORIGIN)
        }
    }

    pub async fn send(&self, mut request: Request<Body>) -> Response<Body> {
        request.extensions_mut().insert(ConnectInfo(self.peer));
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(self.request(Method::GET, uri).body(Body::empty()).unwrap())
            .await
    }

    /// Load the landing page and return a browser-like session holding its
    /// CSRF cookie and token.
    pub async fn browser(&self) -> Browser {
        let response = self.get("/").await;
        assert_eq!(response.status(), 200);
        let mut browser = Browser::default();
        browser.store(&response);
        let html = body_text(response).await;
        browser.csrf_token = meta_content(&html, "csrf-token");
        assert!(browser.csrf_token.is_some(), "page carries a csrf token");
        browser
    }

    /// A state-changing JSON request sent through `browser`.
    pub async fn post_json(&self, browser: &mut Browser, uri: &str, body: Value) -> Response<Body> {
        let request = browser
            .attach(self.request(Method::POST, uri))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = self.send(request).await;
        browser.store(&response);
        response
    }

    pub fn events(&self) -> Vec<String> {
        self.sink.events()
    }
}

/// Cookies and CSRF token carried between requests.
#[derive(Debug, Default, Clone)]
pub struct Browser {
    pub cookies: BTreeMap<String, String>,
    pub csrf_token: Option<String>,
}

impl Browser {
    pub fn store(&mut self, response: &Response<Body>) {
        for value in response.headers().get_all(header::SET_COOKIE) {
            let value = value.to_str().unwrap();
            let pair = value.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            if value.is_empty() {
                self.cookies.remove(name);
            } else {
                self.cookies.insert(name.to_string(), value.to_string());
            }
        }
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn attach(&self, mut builder: axum::http::request::Builder) -> axum::http::request::Builder {
        if !self.cookies.is_empty() {
            builder = builder.header(header::COOKIE, self.cookie_header());
        }
        if let Some(token) = &self.csrf_token {
            builder = builder.header("x-csrf-token", token);
        }
        builder
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// `content` of `<meta name="{name}" content="...">`.
pub fn meta_content(html: &str, name: &str) -> Option<String> {
    let marker = format!("<meta name=\"{}\" content=\"", name);
    let start = html.find(&marker)? + marker.len();
    let end = html[start..].find('"')? + start;
    Some(html[start..end].to_string())
}

/// Regular files below `dir`, recursively.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

/// A valid contact form body.
pub fn contact_body() -> Value {
    serde_json::json!({
        "nombre": "María José",
        "email": "maria@example.com",
        "empresa": "Estudio Pérez",
        "mensaje": "Necesito asesoramiento laboral para mi empresa.",
    })
}
