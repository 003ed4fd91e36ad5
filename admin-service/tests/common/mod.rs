//! Shared fixtures for router-level tests: an app wired against in-memory
//! stores and a recording email mock, so the full middleware stack runs
//! without external services.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use serde_json::Value;

use admin_service::config::{
    AdminConfig, Environment, JwtConfig, MongoConfig, RateLimitConfig, SecurityConfig, SmtpConfig,
    SwaggerConfig, SwaggerMode,
};
use admin_service::models::{Permission, Role, User};
use admin_service::services::{
    ActivityPipeline, AlertDispatcher, ConservativeLoginHeuristic, CredentialStore, JwtService,
    MemoryActivityStore, MemoryCredentialStore, MockEmailService, SuspiciousActivityDetector,
    TwoFactorService,
};
use admin_service::{build_router, AppState};
use service_core::middleware::rate_limit::create_ip_rate_limiter;

pub const ADMIN_EMAIL: &str = "ops@example.com";
pub const PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub credentials: Arc<MemoryCredentialStore>,
    pub activity: Arc<MemoryActivityStore>,
    pub email: Arc<MockEmailService>,
}

pub fn test_config() -> AdminConfig {
    AdminConfig {
        common: service_core::config::Config { port: 8080 },
        environment: Environment::Dev,
        service_name: "admin-service".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        public_base_url: "http://localhost:3000".to_string(),
        mongodb: MongoConfig {
            uri: "mongodb://unused".to_string(),
            database: "unused".to_string(),
            op_timeout_seconds: 5,
        },
        jwt: JwtConfig {
            secret: "integration-test-signing-secret".to_string(),
            token_expiry_days: 30,
        },
        smtp: SmtpConfig {
            relay: "smtp.example.com".to_string(),
            user: "noreply@example.com".to_string(),
            app_password: "unused".to_string(),
            admin_email: ADMIN_EMAIL.to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            default_role: "user".to_string(),
            max_failed_logins: 5,
            failed_login_window_minutes: 15,
            max_hourly_exports: 5,
        },
        rate_limit: RateLimitConfig {
            // Loose enough that tests never trip them.
            login_attempts: 1000,
            login_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Disabled,
        },
    }
}

pub fn setup() -> TestApp {
    setup_with_stores(
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(MemoryActivityStore::new()),
    )
}

pub fn setup_with_stores(
    credentials: Arc<MemoryCredentialStore>,
    activity: Arc<MemoryActivityStore>,
) -> TestApp {
    let email = Arc::new(MockEmailService::new());
    let state = build_state(credentials.clone(), activity.clone(), email.clone());

    TestApp {
        app: build_router(state.clone()),
        state,
        credentials,
        activity,
        email,
    }
}

/// Assemble an [`AppState`] over arbitrary store implementations (used for
/// the unreachable-store tests too).
pub fn build_state(
    store: Arc<dyn CredentialStore>,
    activity_store: Arc<dyn admin_service::services::ActivityStore>,
    email: Arc<MockEmailService>,
) -> AppState {
    let config = test_config();

    let jwt = JwtService::new(&config.jwt);
    let two_factor = TwoFactorService::new(store.clone(), config.service_name.clone());
    let detector = SuspiciousActivityDetector::new(
        activity_store.clone(),
        Arc::new(ConservativeLoginHeuristic),
        config.security.detector_config(),
    );
    let alerts = AlertDispatcher::new(
        activity_store.clone(),
        store.clone(),
        email.clone(),
        config.smtp.admin_email.clone(),
    );
    let pipeline = ActivityPipeline::new(activity_store.clone(), detector, alerts);

    AppState {
        config: config.clone(),
        store,
        activity_store,
        activity: pipeline,
        jwt,
        two_factor,
        email,
        login_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        ),
        ip_rate_limiter: create_ip_rate_limiter(
            config.rate_limit.global_ip_limit,
            config.rate_limit.global_ip_window_seconds,
        ),
    }
}

/// Seed a role and a user referencing it; returns (user, role).
pub async fn seed_user(app: &TestApp, role: Role) -> (User, Role) {
    app.credentials.insert_role(&role).await.unwrap();

    let password_hash = admin_service::utils::password::hash_password(PASSWORD).unwrap();
    let user = User::new(
        "alice".to_string(),
        "alice@example.com".to_string(),
        password_hash,
        role.id.clone(),
    );
    app.credentials.insert_user(&user).await.unwrap();
    (user, role)
}

pub fn basic_role(name: &str) -> Role {
    Role::new(name.to_string(), None, Vec::new())
}

pub fn role_with_permission(name: &str, module: &str, action: &str) -> Role {
    Role::new(
        name.to_string(),
        None,
        vec![Permission {
            name: format!("{}_{}", module, action),
            description: None,
            module: module.to_string(),
            action: action.to_string(),
        }],
    )
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn authed_post(uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
