//! Mediashelf server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware};
use mediashelf_api::{AppState, auth_middleware, router as api_router};
use mediashelf_common::Config;
use mediashelf_core::{
    FollowService, MemorySignalQueue, NotificationService, OtpStore, SignalQueueService,
    UserService,
};
use mediashelf_db::repositories::{
    FollowRelationshipRepository, NotificationRepository, UserRepository,
};
use mediashelf_queue::RedisSignalQueue;
use tokio::signal;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM), then tells every
/// background loop and open stream to stop.
///
/// If a handler cannot be installed the error is logged and only the other
/// signal is awaited.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }

    // Open SSE streams never finish on their own; they end on this flag.
    if shutdown_tx.send(true).is_err() {
        warn!("No shutdown listeners left");
    }
}

/// Build the delivery signal queue: Redis when configured, otherwise in
/// process memory (single instance only).
async fn signal_queue(config: &Config) -> Result<SignalQueueService, Box<dyn std::error::Error>> {
    let ttl = config.delivery.signal_ttl();

    match &config.redis {
        Some(redis) => {
            info!("Connecting to Redis...");
            let client = mediashelf_queue::connect(&redis.url).await?;
            Ok(Arc::new(RedisSignalQueue::new(
                Arc::new(client),
                redis.prefix.clone(),
                ttl,
            )))
        }
        None => {
            warn!("Redis is not configured, delivery signals are kept in memory");
            Ok(Arc::new(MemorySignalQueue::new(ttl)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediashelf=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting mediashelf server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = mediashelf_db::init(&config).await?;
    info!("Connected to database");

    info!("Running database migrations...");
    mediashelf_db::migrate(&db).await?;
    info!("Migrations completed");

    let signal_queue = signal_queue(&config).await?;

    // Initialize repositories
    let db = Arc::new(db);
    let user_repo = UserRepository::new(Arc::clone(&db));
    let follow_repo = FollowRelationshipRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));

    // Initialize services
    let user_service = UserService::new(user_repo.clone(), follow_repo.clone());
    let mut follow_service = FollowService::new(follow_repo.clone(), user_repo.clone());
    follow_service.set_signal_queue(signal_queue.clone());
    let mut notification_service =
        NotificationService::new(notification_repo, user_repo, follow_repo);
    notification_service.set_signal_queue(signal_queue.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let otp_store = Arc::new(OtpStore::new(&config.otp));
    let otp_cleanup = Arc::clone(&otp_store).spawn_cleanup(
        config.otp.cleanup_interval(),
        shutdown_rx.clone(),
    );

    let state = AppState {
        user_service,
        follow_service,
        notification_service,
        signal_queue,
        otp_store,
        delivery: config.delivery.clone(),
        shutdown: shutdown_rx,
    };

    let app = Router::new()
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, url = %config.server.url, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await?;

    if let Err(e) = otp_cleanup.await {
        warn!(error = %e, "One-time code cleanup task failed");
    }

    info!("Server shutdown complete");
    Ok(())
}
