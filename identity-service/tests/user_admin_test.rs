mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};
use uuid::Uuid;

async fn create_user(app: &TestApp, admin: &str, email: &str) -> Value {
    let (status, body) = app
        .request(
            Method::POST,
            "/users",
            Some(json!({ "email": email, "full_name": "Some One" })),
            Some(admin),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn create_list_get_update_delete_users() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    let created = create_user(&app, &admin, "ann@acme.test").await;
    assert_eq!(created["status"], "PENDING_SETUP");
    assert_eq!(created["tenant_id"], tenant_id.to_string());
    let id = created["user_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            "/users",
            Some(json!({ "email": "ann@acme.test", "full_name": "Ann Again" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, page) = app
        .request(Method::GET, "/users?limit=500", None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["limit"], 100);
    assert_eq!(page["users"].as_array().unwrap().len(), 2);

    let (status, fetched) = app
        .request(Method::GET, &format!("/users/{}", id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["email"], "ann@acme.test");

    let (status, updated) = app
        .request(
            Method::PATCH,
            &format!("/users/{}", id),
            Some(json!({ "full_name": "Ann Archer" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["full_name"], "Ann Archer");

    let (status, _) = app
        .request(Method::DELETE, &format!("/users/{}", id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, &format!("/users/{}", id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_payloads_are_rejected() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (status, _) = app
        .request(
            Method::POST,
            "/users",
            Some(json!({ "email": "not-an-email", "full_name": "X" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .request(
            Method::POST,
            "/users/invite",
            Some(json!({
                "email": "new@acme.test",
                "full_name": "New",
                "role_ids": [Uuid::new_v4()],
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn tenants_cannot_see_each_others_users() {
    let app = TestApp::spawn();
    let acme = Uuid::new_v4();
    let globex = Uuid::new_v4();
    let acme_admin = app.onboard_admin(acme, "owner@acme.test").await;
    let globex_admin = app.onboard_admin(globex, "owner@globex.test").await;

    let globex_user = create_user(&app, &globex_admin, "gus@globex.test").await;
    let id = globex_user["user_id"].as_str().unwrap();

    let (status, _) = app
        .request(Method::GET, &format!("/users/{}", id), None, Some(&acme_admin))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(Method::DELETE, &format!("/users/{}", id), None, Some(&acme_admin))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, page) = app
        .request(Method::GET, "/users", None, Some(&acme_admin))
        .await;
    let emails: Vec<&str> = page["users"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|u| u["email"].as_str())
        .collect();
    assert_eq!(emails, vec!["owner@acme.test"]);
}

#[tokio::test]
async fn suspended_user_cannot_log_in() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    app.request(
        Method::POST,
        "/users/invite",
        Some(json!({ "email": "sam@acme.test", "full_name": "Sam" })),
        Some(&admin),
    )
    .await;
    app.pump_lifecycle().await;
    app.post(
        "/auth/register-invited",
        json!({
            "token": app.last_token_for("sam@acme.test"),
            "full_name": "Sam Smith",
            "password": "sam-password",
        }),
    )
    .await;
    app.login(tenant_id, "sam@acme.test", "sam-password").await;

    let sam_id = app.user_id(tenant_id, "sam@acme.test").await;
    let (status, body) = app
        .request(
            Method::POST,
            &format!("/users/{}/suspend", sam_id),
            Some(json!({ "reason": "Policy violation" })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUSPENDED");

    let (status, body) = app
        .post(
            "/auth/login",
            json!({ "email": "sam@acme.test", "password": "sam-password", "tenant_id": tenant_id }),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Account is not active");
}

#[tokio::test]
async fn role_lifecycle_and_assignment() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (status, role) = app
        .request(
            Method::POST,
            "/roles",
            Some(json!({
                "name": "Auditor",
                "description": "Read-only access",
                "permissions": ["users:read", "roles:read", "users:read"],
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(role["permissions"], json!(["roles:read", "users:read"]));
    let role_id = role["role_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            "/roles",
            Some(json!({ "name": "Broken", "permissions": ["users"] })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, roles) = app
        .request(Method::GET, "/roles", None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(roles.as_array().unwrap().len(), 2);

    let user = create_user(&app, &admin, "ann@acme.test").await;
    let user_id = user["user_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(
            Method::POST,
            &format!("/users/{}/roles", user_id),
            Some(json!({ "role_id": role_id })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, held) = app
        .request(
            Method::GET,
            &format!("/users/{}/roles", user_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(held[0]["name"], "Auditor");

    let (status, updated) = app
        .request(
            Method::PATCH,
            &format!("/roles/{}", role_id),
            Some(json!({ "permissions": ["users:*"] })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["permissions"], json!(["users:*"]));
    assert_eq!(updated["name"], "Auditor");

    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/users/{}/roles/{}", user_id, role_id),
            None,
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::DELETE, &format!("/roles/{}", role_id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .request(Method::GET, &format!("/roles/{}", role_id), None, Some(&admin))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn members_without_permissions_are_forbidden() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    app.request(
        Method::POST,
        "/users/invite",
        Some(json!({ "email": "max@acme.test", "full_name": "Max" })),
        Some(&admin),
    )
    .await;
    app.pump_lifecycle().await;
    let (_, registered) = app
        .post(
            "/auth/register-invited",
            json!({
                "token": app.last_token_for("max@acme.test"),
                "full_name": "Max Member",
                "password": "member-password",
            }),
        )
        .await;
    let member = registered["access_token"].as_str().unwrap().to_string();

    for (method, uri) in [
        (Method::GET, "/users".to_string()),
        (Method::GET, "/roles".to_string()),
        (Method::DELETE, format!("/roles/{}", Uuid::new_v4())),
    ] {
        let (status, _) = app.request(method, &uri, None, Some(&member)).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }

    let (status, _) = app
        .request(
            Method::POST,
            "/users",
            Some(json!({ "email": "sneaky@acme.test", "full_name": "Sneaky" })),
            Some(&member),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invited_user_gets_roles_at_invitation() {
    let app = TestApp::spawn();
    let tenant_id = Uuid::new_v4();
    let admin = app.onboard_admin(tenant_id, "owner@acme.test").await;

    let (_, role) = app
        .request(
            Method::POST,
            "/roles",
            Some(json!({ "name": "Viewer", "permissions": ["users:read"] })),
            Some(&admin),
        )
        .await;

    let (status, _) = app
        .request(
            Method::POST,
            "/users/invite",
            Some(json!({
                "email": "vic@acme.test",
                "full_name": "Vic",
                "role_ids": [role["role_id"]],
            })),
            Some(&admin),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    app.pump_lifecycle().await;
    let (_, registered) = app
        .post(
            "/auth/register-invited",
            json!({
                "token": app.last_token_for("vic@acme.test"),
                "full_name": "Vic Viewer",
                "password": "viewer-password",
            }),
        )
        .await;
    let viewer = registered["access_token"].as_str().unwrap().to_string();

    let (status, _) = app
        .request(Method::GET, "/users", None, Some(&viewer))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .request(Method::GET, "/roles", None, Some(&viewer))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
