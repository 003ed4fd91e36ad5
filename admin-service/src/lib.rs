pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::SecurityScheme,
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use service_core::error::AppError;
use service_core::middleware::rate_limit::{ip_rate_limit_middleware, IpRateLimiter};
use service_core::middleware::request_context::request_context_middleware;
use service_core::middleware::security_headers::security_headers_middleware;

use crate::config::AdminConfig;
use crate::middleware::permission::PermissionLayerState;
use crate::models::PermissionRequirement;
use crate::services::{
    ActivityPipeline, ActivityStore, CredentialStore, EmailProvider, JwtService, TwoFactorService,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::logout,
        handlers::auth::me,
        handlers::auth::request_password_reset,
        handlers::auth::confirm_password_reset,
        handlers::security::setup_two_factor,
        handlers::security::enable_two_factor,
        handlers::security::disable_two_factor,
        handlers::security::verify_recovery_code,
        handlers::security::list_ip_whitelist,
        handlers::security::add_ip_to_whitelist,
        handlers::security::remove_ip_from_whitelist,
        handlers::security::clear_ip_whitelist,
        handlers::activity::recent_activity,
    ),
    components(
        schemas(
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::LoginRequest,
            dtos::auth::AuthResponse,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::security::EnableTwoFactorRequest,
            dtos::security::RecoveryCodeRequest,
            dtos::security::TwoFactorSetupResponse,
            dtos::security::TwoFactorEnabledResponse,
            dtos::security::TwoFactorStatusResponse,
            dtos::security::RecoveryCodeResponse,
            dtos::security::IpWhitelistRequest,
            dtos::security::IpWhitelistResponse,
            models::UserResponse,
            models::Role,
            models::Permission,
            models::ActivityRecord,
            models::ActivityAction,
            models::SecurityLevel,
            models::ActivityOutcome,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Authentication", description = "Session and credential management"),
        (name = "Security", description = "Two-factor auth and IP allow-listing"),
        (name = "Activity", description = "Security activity log"),
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
                    utoipa::openapi::security::HttpBuilder::new()
                        .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AdminConfig,
    pub store: Arc<dyn CredentialStore>,
    pub activity_store: Arc<dyn ActivityStore>,
    pub activity: ActivityPipeline,
    pub jwt: JwtService,
    pub two_factor: TwoFactorService,
    pub email: Arc<dyn EmailProvider>,
    pub login_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    // Login gets its own, much tighter limiter in front of the global one.
    let login_limiter = state.login_rate_limiter.clone();
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .layer(from_fn_with_state(login_limiter, ip_rate_limit_middleware));

    // Routes behind the full authentication gate.
    let protected_routes = Router::new()
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/users/me", get(handlers::auth::me))
        .route(
            "/security/2fa/setup",
            post(handlers::security::setup_two_factor),
        )
        .route(
            "/security/2fa/enable",
            post(handlers::security::enable_two_factor),
        )
        .route(
            "/security/2fa/disable",
            post(handlers::security::disable_two_factor),
        )
        .route(
            "/security/2fa/recovery-code",
            post(handlers::security::verify_recovery_code),
        )
        .route(
            "/security/ip-whitelist",
            get(handlers::security::list_ip_whitelist)
                .post(handlers::security::add_ip_to_whitelist)
                .delete(handlers::security::remove_ip_from_whitelist),
        )
        .route(
            "/security/ip-whitelist/all",
            delete(handlers::security::clear_ip_whitelist),
        )
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Gate + fine-grained permission: reading the security activity log
    // requires the structured {logs, read} permission.
    let activity_routes = Router::new()
        .route("/activity/recent", get(handlers::activity::recent_activity))
        .layer(from_fn_with_state(
            PermissionLayerState::new(
                state.clone(),
                vec![PermissionRequirement::structured("logs", "read")],
            ),
            middleware::permission_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics));

    let swagger_enabled = match state.config.environment {
        config::Environment::Dev => true,
        config::Environment::Prod => state.config.swagger.enabled == config::SwaggerMode::Public,
    };

    if swagger_enabled {
        app = app.merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    let ip_limiter = state.ip_rate_limiter.clone();

    app.route("/auth/register", post(handlers::auth::register))
        .route(
            "/auth/password-reset/request",
            post(handlers::auth::request_password_reset),
        )
        .route(
            "/auth/password-reset/confirm",
            post(handlers::auth::confirm_password_reset),
        )
        .merge(login_route)
        .merge(protected_routes)
        .merge(activity_routes)
        .with_state(state.clone())
        // Global per-address rate limiting
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit_middleware))
        // Request counters
        .layer(from_fn(middleware::metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
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
                )
            }),
        )
        // Correlation id + source address context for every layer below
        .layer(from_fn(request_context_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(
                    state
                        .config
                        .security
                        .allowed_origins
                        .iter()
                        .filter_map(|o| {
                            o.parse::<axum::http::HeaderValue>()
                                .map_err(|e| {
                                    tracing::error!("Invalid CORS origin '{}': {}", o, e);
                                    e
                                })
                                .ok()
                        })
                        .collect::<Vec<axum::http::HeaderValue>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::HeaderName::from_static("x-2fa-code"),
                    axum::http::header::HeaderName::from_static("x-request-id"),
                ]),
        )
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, AppError> {
    state.store.health_check().await.map_err(|e| {
        tracing::error!(error = %e, "Credential store health check failed");
        AppError::from(e)
    })?;

    Ok(axum::Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
