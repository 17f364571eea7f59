use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use identity_service::{
    build_router,
    config::{IdentityConfig, NotifierKind, StoreBackend},
    db,
    events::{
        connect_redis, BrokerNotifier, EventPublisher, Notifier, RedisStreamPublisher,
        SmtpNotifier,
    },
    services::{
        store::{CredentialStore, InMemoryStore, PgStore, RoleDirectory, UserDirectory},
        AuthnService, Choreographer, CredentialLifecycle, OpaPolicyEngine, PermissionEvaluator,
        PolicyEngine, RoleService, SessionIssuer, UserService,
    },
    workers::{EventConsumer, EventDispatcher, Subscription, TokenSweeper},
    AppState, HealthProbes,
};
use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use tokio::signal;
use tokio_util::sync::CancellationToken;

struct Directories {
    users: Arc<dyn UserDirectory>,
    roles: Arc<dyn RoleDirectory>,
    credentials: Arc<dyn CredentialStore>,
    postgres: Option<PgStore>,
}

async fn open_directories(config: &IdentityConfig) -> Result<Directories, AppError> {
    match config.store {
        StoreBackend::Postgres => {
            let pool = db::create_pool(&config.database)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            db::run_migrations(&pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.into()))?;
            let store = PgStore::new(pool);
            Ok(Directories {
                users: Arc::new(store.clone()),
                roles: Arc::new(store.clone()),
                credentials: Arc::new(store.clone()),
                postgres: Some(store),
            })
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; all state is lost on restart");
            let store = Arc::new(InMemoryStore::new());
            Ok(Directories {
                users: store.clone(),
                roles: store.clone(),
                credentials: store,
                postgres: None,
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    identity_service::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        store = ?config.store,
        "Starting identity service"
    );

    let directories = open_directories(&config).await?;

    let redis = connect_redis(&config.redis).await?;
    let broker = RedisStreamPublisher::new(redis);
    let publisher: Arc<dyn EventPublisher> = Arc::new(broker.clone());

    let notifier: Arc<dyn Notifier> = match (&config.notifier.kind, &config.notifier.smtp) {
        (NotifierKind::Smtp, Some(smtp)) => Arc::new(SmtpNotifier::new(smtp)?),
        _ => Arc::new(BrokerNotifier::new(publisher.clone())),
    };
    tracing::info!(notifier = ?config.notifier.kind, "Notifier initialized");

    let policy: Option<Arc<dyn PolicyEngine>> = if config.policy.enabled {
        tracing::info!(url = %config.policy.url, "OPA policy engine enabled");
        Some(Arc::new(OpaPolicyEngine::new(&config.policy)?))
    } else {
        None
    };

    let sessions = Arc::new(SessionIssuer::new(&config.jwt));
    let lifecycle = Arc::new(CredentialLifecycle::new(
        directories.users.clone(),
        directories.credentials.clone(),
        publisher.clone(),
        notifier,
        config.tokens.clone(),
    ));
    let authn = AuthnService::new(
        directories.users.clone(),
        directories.credentials.clone(),
        lifecycle.clone(),
        sessions.clone(),
        publisher.clone(),
    );
    let authz = PermissionEvaluator::new(directories.roles.clone(), sessions.clone(), policy);
    let users = UserService::new(
        directories.users.clone(),
        directories.roles.clone(),
        publisher.clone(),
    );
    let roles = RoleService::new(directories.roles.clone());
    let choreographer = Choreographer::new(
        directories.users.clone(),
        users.clone(),
        lifecycle.clone(),
        publisher,
    );

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let password_reset_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.password_reset_attempts,
        config.rate_limit.password_reset_window_seconds,
    );

    // Background workers
    let shutdown = CancellationToken::new();
    let dispatcher = EventDispatcher::new(
        choreographer.clone(),
        Duration::from_secs(config.events.max_retry_seconds),
    );
    let mut workers = Vec::new();
    for subscription in [Subscription::TenantProvisioned, Subscription::UserLifecycle] {
        // XREADGROUP BLOCK holds its connection, so each consumer gets its own.
        let connection = connect_redis(&config.redis).await?;
        let consumer = EventConsumer::new(
            subscription,
            dispatcher.clone(),
            connection,
            config.events.clone(),
            shutdown.clone(),
        );
        workers.push(tokio::spawn(consumer.run()));
    }
    let sweeper = TokenSweeper::new(
        lifecycle,
        Duration::from_secs(config.tokens.sweep_interval_seconds),
        shutdown.clone(),
    );
    workers.push(tokio::spawn(sweeper.run()));

    let state = AppState {
        config: config.clone(),
        sessions,
        authn,
        authz,
        users,
        roles,
        choreographer,
        health: HealthProbes {
            database: directories.postgres,
            broker: Some(broker),
        },
        login_rate_limiter,
        password_reset_rate_limiter,
    };
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "Background worker terminated abnormally");
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

    // Stop consumers and the sweeper; in-flight requests drain via axum.
    shutdown.cancel();
}
