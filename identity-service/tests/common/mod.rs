//! Shared setup for identity-service integration tests.
//!
//! Builds the full router over the in-memory store, a recording publisher and
//! a recording notifier, so tests need neither PostgreSQL nor Redis.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use identity_service::{
    build_router,
    config::{
        DatabaseConfig, Environment, EventsConfig, IdentityConfig, JwtConfig, NotifierConfig,
        NotifierKind, PolicyConfig, RateLimitConfig, RedisConfig, SecurityConfig, StoreBackend,
        TokenConfig,
    },
    events::{EventPublisher, InMemoryPublisher, Notifier, RecordingNotifier, TenantProvisioned},
    models::Role,
    services::{
        store::{InMemoryStore, RoleDirectory, UserDirectory},
        AuthnService, Choreographer, CredentialLifecycle, PermissionEvaluator, RoleService,
        SessionIssuer, UserService,
    },
    AppState, HealthProbes,
};
use secrecy::Secret;
use serde_json::Value;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const ADMIN_PASSWORD: &str = "admin-password-1";

pub fn test_config() -> IdentityConfig {
    IdentityConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Dev,
        service_name: "identity-service-test".to_string(),
        service_version: "0.0.0".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        store: StoreBackend::Memory,
        database: DatabaseConfig {
            url: Secret::new(String::new()),
            max_connections: 1,
            min_connections: 1,
        },
        redis: RedisConfig {
            url: Secret::new("redis://127.0.0.1:6379".to_string()),
        },
        jwt: JwtConfig {
            secret: Secret::new("integration-test-secret-of-32-bytes!!".to_string()),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_hours: 24,
        },
        tokens: TokenConfig {
            setup_ttl_hours: 24,
            reset_ttl_minutes: 60,
            invitation_ttl_hours: 72,
            email_verification_ttl_hours: 24,
            app_base_url: "https://app.example.com".to_string(),
            sweep_interval_seconds: 3600,
        },
        policy: PolicyConfig {
            enabled: false,
            url: "http://localhost:8181".to_string(),
            policy_path: "iam/authz".to_string(),
            timeout_ms: 500,
        },
        notifier: NotifierConfig {
            kind: NotifierKind::Broker,
            smtp: None,
        },
        events: EventsConfig {
            consumer_group: "identity-service".to_string(),
            consumer_name: "test".to_string(),
            block_ms: 100,
            batch_size: 16,
            max_retry_seconds: 0,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        rate_limit: RateLimitConfig {
            login_attempts: 100,
            login_window_seconds: 60,
            password_reset_attempts: 100,
            password_reset_window_seconds: 60,
        },
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub publisher: Arc<InMemoryPublisher>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub fn spawn() -> Self {
        Self::spawn_with(test_config())
    }

    pub fn spawn_with(config: IdentityConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let publisher = Arc::new(InMemoryPublisher::new());
        let notifier = Arc::new(RecordingNotifier::new());

        let users: Arc<dyn UserDirectory> = store.clone();
        let roles: Arc<dyn RoleDirectory> = store.clone();
        let events: Arc<dyn EventPublisher> = publisher.clone();
        let mail: Arc<dyn Notifier> = notifier.clone();

        let sessions = Arc::new(SessionIssuer::new(&config.jwt));
        let lifecycle = Arc::new(CredentialLifecycle::new(
            users.clone(),
            store.clone(),
            events.clone(),
            mail,
            config.tokens.clone(),
        ));
        let authn = AuthnService::new(
            users.clone(),
            store.clone(),
            lifecycle.clone(),
            sessions.clone(),
            events.clone(),
        );
        let authz = PermissionEvaluator::new(roles.clone(), sessions.clone(), None);
        let user_service = UserService::new(users.clone(), roles.clone(), events.clone());
        let role_service = RoleService::new(roles);
        let choreographer = Choreographer::new(users, user_service.clone(), lifecycle, events);

        let state = AppState {
            config: config.clone(),
            sessions,
            authn,
            authz,
            users: user_service,
            roles: role_service,
            choreographer,
            health: HealthProbes::default(),
            login_rate_limiter: service_core::middleware::rate_limit::create_ip_rate_limiter(
                config.rate_limit.login_attempts,
                config.rate_limit.login_window_seconds,
            ),
            password_reset_rate_limiter:
                service_core::middleware::rate_limit::create_ip_rate_limiter(
                    config.rate_limit.password_reset_attempts,
                    config.rate_limit.password_reset_window_seconds,
                ),
        };

        Self {
            router: build_router(state.clone()),
            state,
            store,
            publisher,
            notifier,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body collects")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        bearer: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body), None).await
    }

    /// Feeds every recorded lifecycle event back through the choreographer,
    /// the way the `user.lifecycle` consumer would.
    pub async fn pump_lifecycle(&self) {
        loop {
            let events = self.publisher.drain_lifecycle();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.state
                    .choreographer
                    .handle_lifecycle_event(&event)
                    .await
                    .expect("lifecycle event handled");
            }
        }
    }

    /// Plaintext token from the last email sent to `to`.
    pub fn last_token_for(&self, to: &str) -> String {
        let mail = self.notifier.last_to(to).expect("an email was sent");
        plaintext_from(&mail.body)
    }

    /// Runs tenant onboarding end to end and returns the admin's access token.
    pub async fn onboard_admin(&self, tenant_id: Uuid, email: &str) -> String {
        self.state
            .choreographer
            .handle_tenant_provisioned(&TenantProvisioned {
                tenant_id,
                admin_email: email.to_string(),
                admin_full_name: "Tenant Admin".to_string(),
            })
            .await
            .expect("tenant provisioned");
        self.pump_lifecycle().await;

        let token = self.last_token_for(email);
        let (status, _) = self
            .post(
                "/auth/initial-password",
                serde_json::json!({ "token": token, "new_password": ADMIN_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        self.login(tenant_id, email, ADMIN_PASSWORD).await
    }

    pub async fn login(&self, tenant_id: Uuid, email: &str, password: &str) -> String {
        let (status, body) = self
            .post(
                "/auth/login",
                serde_json::json!({
                    "email": email,
                    "password": password,
                    "tenant_id": tenant_id.to_string(),
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["access_token"]
            .as_str()
            .expect("access token present")
            .to_string()
    }

    /// Creates a role straight in the directory and assigns it to `user_id`.
    pub async fn grant(&self, tenant_id: Uuid, user_id: Uuid, permissions: &[&str]) {
        let role = Role::new(
            tenant_id,
            format!("grant-{}", Uuid::new_v4()),
            String::new(),
            permissions.iter().map(|p| p.to_string()).collect(),
        );
        self.store.create_role(&role).await.expect("role created");
        self.store
            .assign_role(user_id, role.role_id, tenant_id)
            .await
            .expect("role assigned");
    }

    pub async fn user_id(&self, tenant_id: Uuid, email: &str) -> Uuid {
        self.store
            .get_user_by_email(tenant_id, email)
            .await
            .expect("lookup succeeds")
            .expect("user exists")
            .user_id
    }
}

pub fn plaintext_from(body: &str) -> String {
    let encoded = body
        .split("token=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .expect("email carries a token link");
    urlencoding::decode(encoded)
        .expect("token is url-encoded")
        .into_owned()
}
