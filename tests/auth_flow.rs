//! Registration, login, refresh and logout through the full router.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, StatusCode},
};
use serde_json::json;
use tokio::task::JoinSet;
use tower::ServiceExt;

mod common;
use common::{body_json, Browser, TestApp, PASSWORD};

async fn register(app: &TestApp, browser: &mut Browser, email: &str) -> StatusCode {
    app.post_json(
        browser,
        "/api/auth/register",
        json!({
            "email": email,
            "password": PASSWORD,
            "passwordConfirm": PASSWORD,
            "nombre": "Ana Gómez",
        }),
    )
    .await
    .status()
}

#[tokio::test]
async fn test_register_login_refresh_logout() {
    let app = TestApp::new();
    let mut browser = app.browser().await;

    assert_eq!(register(&app, &mut browser, "Ana@Example.com").await, StatusCode::CREATED);
    assert!(app.events().contains(&"USER_REGISTERED".to_string()));

    let response = app
        .post_json(
            &mut browser,
            "/api/auth/login",
            json!({ "email": "ana@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store, no-cache, must-revalidate, proxy-revalidate");
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["user"]["email"], "ana@example.com");
    assert_eq!(body["user"]["role"], "user");
    let access = body["accessToken"].as_str().unwrap().to_string();
    assert!(browser.cookies.contains_key("refreshToken"));
    assert!(browser.cookies.contains_key("tns_session"));
    assert_eq!(app.state.sessions.len(), 1);

    let claims = app
        .state
        .tokens
        .verify(nextstep_web::auth::TokenKind::Access, &access)
        .unwrap();
    assert_eq!(claims.email, "ana@example.com");

    let response = app.post_json(&mut browser, "/api/auth/refresh", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["accessToken"].is_string());

    let response = app.post_json(&mut browser, "/api/auth/logout", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!browser.cookies.contains_key("refreshToken"));
    assert!(!browser.cookies.contains_key("tns_session"));
    assert!(app.state.sessions.is_empty());

    let response = app.post_json(&mut browser, "/api/auth/refresh", json!({})).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Refresh token not provided");

    let events = app.events();
    for event in ["LOGIN_SUCCESS", "TOKEN_REFRESHED", "LOGOUT"] {
        assert!(events.contains(&event.to_string()), "missing {}", event);
    }
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = TestApp::new();
    let mut browser = app.browser().await;

    assert_eq!(register(&app, &mut browser, "ana@example.com").await, StatusCode::CREATED);
    assert_eq!(register(&app, &mut browser, "ANA@example.com").await, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_weak_password_is_reported() {
    let app = TestApp::new();
    let mut browser = app.browser().await;

    let response = app
        .post_json(
            &mut browser,
            "/api/auth/register",
            json!({
                "email": "ana@example.com",
                "password": "onlylowercaseletters",
                "passwordConfirm": "onlylowercaseletters",
                "nombre": "Ana",
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["details"]
        .as_array()
        .unwrap()
        .iter()
        .all(|d| d["field"] == "password"));
}

#[tokio::test]
async fn test_wrong_password_is_generic() {
    let app = TestApp::new();
    let mut browser = app.browser().await;
    register(&app, &mut browser, "ana@example.com").await;

    let response = app
        .post_json(
            &mut browser,
            "/api/auth/login",
            json!({ "email": "ana@example.com", "password": "Wr0ng!Passw0rd@" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid email or password");

    let failed = app
        .sink
        .records()
        .into_iter()
        .find(|r| r.event == "LOGIN_FAILED")
        .unwrap();
    assert_eq!(failed.fields["reason"], "INVALID_PASSWORD");
}

#[tokio::test]
async fn test_repeated_failures_block_authentication() {
    let app = TestApp::new();
    let mut browser = app.browser().await;
    let attempt = json!({ "email": "nadie@example.com", "password": "Wr0ng!Passw0rd@" });

    for _ in 0..5 {
        let response = app
            .post_json(&mut browser, "/api/auth/login", attempt.clone())
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.post_json(&mut browser, "/api/auth/login", attempt).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(app.events().contains(&"BRUTE_FORCE_SUSPECTED".to_string()));
}

#[tokio::test]
async fn test_concurrent_guesses_share_one_budget() {
    let app = TestApp::with_config(|config| config.auth.failure_delay_ms = 300);
    let mut browser = app.browser().await;
    register(&app, &mut browser, "ana@example.com").await;

    let mut attempts = JoinSet::new();
    for _ in 0..20 {
        let mut request = browser
            .attach(app.request(Method::POST, "/api/auth/login"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "ana@example.com", "password": "Wr0ng!Passw0rd@" }).to_string(),
            ))
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(app.peer));
        let router = app.router.clone();
        attempts.spawn(async move { router.oneshot(request).await.unwrap().status() });
    }

    let mut unauthorized = 0;
    let mut limited = 0;
    while let Some(status) = attempts.join_next().await {
        let status = status.unwrap();
        if status == StatusCode::UNAUTHORIZED {
            unauthorized += 1;
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        } else {
            panic!("unexpected status {}", status);
        }
    }
    assert_eq!(unauthorized, 5);
    assert_eq!(limited, 15);
}

#[tokio::test]
async fn test_rejected_before_handler_keeps_budget() {
    let app = TestApp::new();
    let mut browser = app.browser().await;
    register(&app, &mut browser, "ana@example.com").await;

    for _ in 0..8 {
        let mut request = browser
            .attach(app.request(Method::POST, "/api/auth/login"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "email": "ana@example.com", "password": PASSWORD }).to_string(),
            ))
            .unwrap();
        request.headers_mut().remove("x-csrf-token");
        let response = app.send(request).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    let response = app
        .post_json(
            &mut browser,
            "/api/auth/login",
            json!({ "email": "ana@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_successful_logins_do_not_count_as_failures() {
    let app = TestApp::new();
    let mut browser = app.browser().await;
    register(&app, &mut browser, "ana@example.com").await;

    for _ in 0..6 {
        let response = app
            .post_json(
                &mut browser,
                "/api/auth/login",
                json!({ "email": "ana@example.com", "password": PASSWORD }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_refresh_rejects_access_token_in_cookie_slot() {
    let app = TestApp::new();
    let mut browser = app.browser().await;
    register(&app, &mut browser, "ana@example.com").await;

    let body = body_json(
        app.post_json(
            &mut browser,
            "/api/auth/login",
            json!({ "email": "ana@example.com", "password": PASSWORD }),
        )
        .await,
    )
    .await;
    let access = body["accessToken"].as_str().unwrap();

    // Present the access token as a bearer credential; the refresh endpoint
    // only honors its own cookie.
    let mut stripped = browser.clone();
    stripped.cookies.remove("refreshToken");
    let request = stripped
        .attach(app.request(Method::POST, "/api/auth/refresh"))
        .header(header::AUTHORIZATION, format!("Bearer {}", access))
        .body(Body::empty())
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
