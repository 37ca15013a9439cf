//! Multipart uploads through the full router.

use axum::{
    body::Body,
    http::{header, Method, StatusCode},
};

use nextstep_web::auth::{TokenKind, User};

mod common;
use common::{body_json, count_files, TestApp};

const BOUNDARY: &str = "----nextstep-test-boundary";
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

fn multipart(files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, mime, data) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                name
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", mime).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn access_token(app: &TestApp) -> String {
    let user = User::new("ana@example.com", "Ana", "unused-hash".to_string());
    app.state.tokens.issue(TokenKind::Access, &user).unwrap()
}

async fn upload(app: &TestApp, token: &str, files: &[(&str, &str, &[u8])]) -> axum::http::Response<Body> {
    let request = app
        .request(Method::POST, "/api/uploads")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart(files)))
        .unwrap();
    app.send(request).await
}

#[tokio::test]
async fn test_jpeg_is_stored_under_random_name() {
    let app = TestApp::new();
    let token = access_token(&app);

    let response = upload(&app, &token, &[("retrato.jpg", "image/jpeg", JPEG)]).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    let file = &body["files"][0];
    assert_eq!(file["originalName"], "retrato.jpg");
    assert_eq!(file["mimeType"], "image/jpeg");
    let stored = file["storedName"].as_str().unwrap();
    assert!(stored.ends_with(".jpg"));
    assert!(!stored.contains("retrato"));
    assert!(file.get("path").is_none());
    assert_eq!(count_files(app.upload_dir.path()), 1);
}

#[tokio::test]
async fn test_double_extension_is_rejected() {
    let app = TestApp::new();
    let token = access_token(&app);

    let response = upload(&app, &token, &[("shell.php.jpg", "image/jpeg", JPEG)]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_failed_request_removes_earlier_files() {
    let app = TestApp::new();
    let token = access_token(&app);

    let response = upload(
        &app,
        &token,
        &[
            ("uno.jpg", "image/jpeg", JPEG),
            ("dos.gif", "image/gif", b"GIF89a"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("File type not allowed"));
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_content_must_match_declared_type() {
    let app = TestApp::new();
    let token = access_token(&app);

    let response = upload(&app, &token, &[("foto.png", "image/png", b"<?php system(1) ?>")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_oversized_file_is_rejected() {
    let app = TestApp::new();
    let token = access_token(&app);
    let mut data = JPEG.to_vec();
    data.resize(2048, 0);

    let response = upload(&app, &token, &[("grande.jpg", "image/jpeg", &data)]).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_upload_requires_valid_token() {
    let app = TestApp::new();

    let response = upload(&app, "not-a-jwt", &[("retrato.jpg", "image/jpeg", JPEG)]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["code"], "INVALID_TOKEN");
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_upload_requires_uploading_role() {
    let app = TestApp::new();
    let mut guest = User::new("visita@example.com", "Visita", "unused-hash".to_string());
    guest.role = "guest".to_string();
    let token = app.state.tokens.issue(TokenKind::Access, &guest).unwrap();

    let response = upload(&app, &token, &[("retrato.jpg", "image/jpeg", JPEG)]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(count_files(app.upload_dir.path()), 0);
}

#[tokio::test]
async fn test_client_file_name_is_sanitized() {
    let app = TestApp::new();
    let token = access_token(&app);

    let response = upload(&app, &token, &[("mi foto (1).jpg", "image/jpeg", JPEG)]).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["files"][0]["originalName"], "mi_foto__1_.jpg");
}

#[tokio::test]
async fn test_empty_upload_is_rejected() {
    let app = TestApp::new();
    let token = access_token(&app);

    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhola\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = app
        .request(Method::POST, "/api/uploads")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No files uploaded");
}
