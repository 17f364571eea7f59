mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{test_config, TestApp, ADMIN_PASSWORD};
use serde_json::json;
use uuid::Uuid;

async fn login_body(app: &TestApp, tenant_id: Uuid) -> serde_json::Value {
    let (status, body) = app
        .post(
            "/auth/login",
            json!({ "email": "owner@acme.test", "password": ADMIN_PASSWORD, "tenant_id": tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn login_returns_token_pair_and_profile() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    app.onboard_admin(tenant_id, "owner@acme.test").await;

    let body = login_body(&app, tenant_id).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 900);
    assert_eq!(body["user"]["email"], "owner@acme.test");
    assert_eq!(body["user"]["status"], "ACTIVE");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (wrong_status, wrong_body) = app
        .post(
            "/auth/login",
            json!({ "email": "owner@acme.test", "password": "not-the-password", "tenant_id": tenant_id }),
        )
        .await;
    let (unknown_status, unknown_body) = app
        .post(
            "/auth/login",
            json!({ "email": "ghost@acme.test", "password": "not-the-password", "tenant_id": tenant_id }),
        )
        .await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
}

#[tokio::test]
async fn login_is_scoped_to_the_tenant() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (status, _) = app
        .post(
            "/auth/login",
            json!({ "email": "owner@acme.test", "password": ADMIN_PASSWORD, "tenant_id": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .post(
            "/auth/login",
            json!({ "email": "owner@acme.test", "password": ADMIN_PASSWORD, "tenant_id": "acme" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_issues_new_access_token_but_rejects_access_tokens() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    app.onboard_admin(tenant_id, "owner@acme.test").await;
    let body = login_body(&app, tenant_id).await;

    let (status, refreshed) = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": body["refresh_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["token_type"], "Bearer");

    let (status, claims) = app
        .post(
            "/auth/validate",
            json!({ "token": refreshed["access_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claims["valid"], true);
    assert_eq!(claims["tenant_id"], tenant_id.to_string());
    assert_eq!(claims["email"], "owner@acme.test");

    let (status, _) = app
        .post(
            "/auth/refresh",
            json!({ "refresh_token": body["access_token"] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_token_is_not_a_bearer_credential() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    app.onboard_admin(tenant_id, "owner@acme.test").await;
    let body = login_body(&app, tenant_id).await;

    let refresh = body["refresh_token"].as_str().unwrap();
    let (status, _) = app
        .request(Method::GET, "/users", None, Some(refresh))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = TestApp::spawn();

    let (status, body) = app.request(Method::GET, "/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Missing or invalid Authorization header");

    let (status, _) = app
        .request(Method::GET, "/users", None, Some("garbage.token.value"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_outstanding_reset_links() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let access = app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (status, _) = app
        .post(
            "/auth/forgot-password",
            json!({ "email": "owner@acme.test", "tenant_id": tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let reset_token = app.last_token_for("owner@acme.test");

    let (status, _) = app
        .request(Method::POST, "/auth/logout", None, Some(&access))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .post(
            "/auth/reset-password",
            json!({ "token": reset_token, "new_password": "brand-new-password" }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_is_rate_limited_per_ip() {
    let mut config = test_config();
    config.rate_limit.login_attempts = 2;
    config.rate_limit.login_window_seconds = 3600;
    let app = TestApp::spawn_with(config);

    let attempt = || {
        Request::builder()
            .method(Method::POST)
            .uri("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::from(
                json!({
                    "email": "nobody@acme.test",
                    "password": "whatever-password",
                    "tenant_id": Uuid::new_v4(),
                })
                .to_string(),
            ))
            .unwrap()
    };

    for _ in 0..2 {
        let (status, _) = app.send(attempt()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, _) = app.send(attempt()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}
