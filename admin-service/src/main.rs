use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use admin_service::{
    build_router,
    config::AdminConfig,
    services::{
        ActivityPipeline, AlertDispatcher, ConservativeLoginHeuristic, EmailService, JwtService,
        MongoDb, SuspiciousActivityDetector, TwoFactorService,
    },
    AppState,
};
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = AdminConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    admin_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting admin service"
    );

    // Database
    let db = MongoDb::connect(
        &config.mongodb.uri,
        &config.mongodb.database,
        Duration::from_secs(config.mongodb.op_timeout_seconds),
    )
    .await?;
    db.initialize_indexes().await?;
    tracing::info!("Database initialized successfully");

    let store: Arc<dyn admin_service::services::CredentialStore> = Arc::new(db.clone());
    let activity_store: Arc<dyn admin_service::services::ActivityStore> = Arc::new(db.clone());

    // Email
    let email = Arc::new(EmailService::new(&config.smtp)?);
    tracing::info!("Email service initialized");

    // Core services
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
    let activity = ActivityPipeline::new(activity_store.clone(), detector, alerts);
    tracing::info!("Security core initialized");

    // Rate limiters
    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let ip_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.global_ip_limit,
        config.rate_limit.global_ip_window_seconds,
    );
    tracing::info!("Rate limiters initialized: Login and Global IP");

    let state = AppState {
        config: config.clone(),
        store,
        activity_store,
        activity,
        jwt,
        two_factor,
        email,
        login_rate_limiter,
        ip_rate_limiter,
    };

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
