pub mod config;
pub mod db;
pub mod dtos;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;
pub mod workers;

use std::sync::Arc;

use service_core::axum::{
    extract::State,
    http::{header, HeaderValue, Method, Request},
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Json, Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::config::IdentityConfig;
use crate::events::RedisStreamPublisher;
use crate::services::{
    store::PgStore, AuthnService, Choreographer, PermissionEvaluator, RoleService, SessionIssuer,
    UserService,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::session::login,
        handlers::auth::session::refresh,
        handlers::auth::session::validate,
        handlers::auth::session::logout,
        handlers::auth::password::forgot_password,
        handlers::auth::password::reset_password,
        handlers::auth::password::change_password,
        handlers::auth::password::confirm_password,
        handlers::auth::onboarding::set_initial_password,
        handlers::auth::onboarding::register_invited,
        handlers::auth::onboarding::verify_email,
        handlers::auth::onboarding::request_email_verification,
        handlers::authz::check_access,
        handlers::authz::user_permissions,
        handlers::user::create_user,
        handlers::user::invite_user,
        handlers::user::list_users,
        handlers::user::get_user,
        handlers::user::update_user,
        handlers::user::delete_user,
        handlers::user::suspend_user,
        handlers::user::list_user_roles,
        handlers::user::assign_role,
        handlers::user::revoke_role,
        handlers::role::create_role,
        handlers::role::list_roles,
        handlers::role::get_role,
        handlers::role::update_role,
        handlers::role::delete_role,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::RefreshRequest,
            dtos::auth::RefreshResponse,
            dtos::auth::ValidateTokenRequest,
            dtos::auth::ValidateTokenResponse,
            dtos::auth::SetInitialPasswordRequest,
            dtos::auth::RegisterInvitedRequest,
            dtos::auth::ForgotPasswordRequest,
            dtos::auth::ResetPasswordRequest,
            dtos::auth::ChangePasswordRequest,
            dtos::auth::ConfirmPasswordRequest,
            dtos::auth::VerifyEmailRequest,
            dtos::auth::MessageResponse,
            dtos::authz::CheckAccessRequest,
            dtos::authz::UserPermissionsResponse,
            dtos::admin::CreateUserRequest,
            dtos::admin::InviteUserRequest,
            dtos::admin::UpdateUserRequest,
            dtos::admin::SuspendUserRequest,
            dtos::admin::UserListResponse,
            dtos::admin::AssignRoleRequest,
            dtos::admin::CreateRoleRequest,
            dtos::admin::UpdateRoleRequest,
            services::AccessDecision,
            models::Role,
            models::UserResponse,
            models::UserStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Login and session tokens"),
        (name = "Password", description = "Password reset and change"),
        (name = "Onboarding", description = "Initial password setup, invitations and email verification"),
        (name = "Authorization", description = "Permission decisions"),
        (name = "Users", description = "Tenant user administration"),
        (name = "Roles", description = "Tenant role administration"),
        (name = "Observability", description = "Service health and monitoring"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Backends probed by `/health`. Absent probes are reported as not configured.
#[derive(Clone, Default)]
pub struct HealthProbes {
    pub database: Option<PgStore>,
    pub broker: Option<RedisStreamPublisher>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: IdentityConfig,
    pub sessions: Arc<SessionIssuer>,
    pub authn: AuthnService,
    pub authz: PermissionEvaluator,
    pub users: UserService,
    pub roles: RoleService,
    pub choreographer: Choreographer,
    pub health: HealthProbes,
    pub login_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::login))
        .layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let forgot_route = Router::new()
        .route("/auth/forgot-password", post(handlers::forgot_password))
        .layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    // Routes requiring a valid access token
    let protected = Router::new()
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/change-password", post(handlers::change_password))
        .route("/auth/confirm-password", post(handlers::confirm_password))
        .route(
            "/auth/request-email-verification",
            post(handlers::request_email_verification),
        )
        .route(
            "/authz/users/:id/permissions",
            get(handlers::user_permissions),
        )
        .route(
            "/users",
            post(handlers::create_user).get(handlers::list_users),
        )
        .route("/users/invite", post(handlers::invite_user))
        .route(
            "/users/:id",
            get(handlers::get_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .route("/users/:id/suspend", post(handlers::suspend_user))
        .route(
            "/users/:id/roles",
            get(handlers::list_user_roles).post(handlers::assign_role),
        )
        .route("/users/:id/roles/:role_id", delete(handlers::revoke_role))
        .route(
            "/roles",
            post(handlers::create_role).get(handlers::list_roles),
        )
        .route(
            "/roles/:id",
            get(handlers::get_role)
                .patch(handlers::update_role)
                .delete(handlers::delete_role),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .security
                .allowed_origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect::<Vec<HeaderValue>>(),
        )
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .route(
            "/.well-known/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/validate", post(handlers::validate))
        .route("/auth/reset-password", post(handlers::reset_password))
        .route("/auth/initial-password", post(handlers::set_initial_password))
        .route("/auth/register-invited", post(handlers::register_invited))
        .route("/auth/verify-email", post(handlers::verify_email))
        .route("/authz/check", post(handlers::check_access))
        .merge(login_route)
        .merge(forgot_route)
        .merge(protected)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
        .layer(cors)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 500, description = "A backend is unreachable")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let database = match &state.health.database {
        Some(store) => {
            store.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                AppError::from(e)
            })?;
            "up"
        }
        None => "not_configured",
    };

    let broker = match &state.health.broker {
        Some(publisher) => {
            publisher.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "Redis health check failed");
                AppError::InternalError(e)
            })?;
            "up"
        }
        None => "not_configured",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "postgres": database,
            "redis": broker
        }
    })))
}
