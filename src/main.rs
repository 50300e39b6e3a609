use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::HeaderValue;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod routes;
mod services;

use config::Config;
use services::init;
use services::whatsapp::WhatsAppService;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub whatsapp: Option<WhatsAppService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "calendar_notifications=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Calendar Notifications Service");

    // Initialize database
    let pool = init::init_db(&config).await?;

    let whatsapp = WhatsAppService::from_config(&config.whatsapp);
    if whatsapp.is_none() {
        tracing::info!("Twilio credentials not configured; WhatsApp digest disabled");
    }

    let app_state = Arc::new(AppState {
        db: pool.clone(),
        config: config.clone(),
        whatsapp,
    });

    // Create shutdown notifier for background workers
    let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    // Spawn the reminder dispatcher loop
    let dispatcher = Arc::new(init::build_dispatcher(&config, pool)?);
    let poll_interval = Duration::from_secs(config.reminder.poll_interval_seconds);
    let dispatcher_handle = dispatcher.spawn(poll_interval, shutdown_tx.clone());
    tracing::info!(
        "Reminder dispatcher polling every {}s",
        poll_interval.as_secs()
    );

    // Build router
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/auth", routes::auth::router())
        .nest("/events", routes::events::router())
        .nest("/push", routes::push::router())
        .nest("/cron", routes::cron::router())
        .with_state(app_state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(
                    config
                        .server
                        .frontend_url
                        .parse::<HeaderValue>()
                        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?,
                )
                .allow_methods([
                    http::Method::GET,
                    http::Method::POST,
                    http::Method::PUT,
                    http::Method::DELETE,
                    http::Method::OPTIONS,
                ])
                .allow_headers([
                    http::header::CONTENT_TYPE,
                    http::header::AUTHORIZATION,
                    http::header::ACCEPT,
                ])
                .allow_credentials(true),
        );

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    let shutdown_tx_clone = shutdown_tx.clone();
    let signal_fut = async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut term =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to bind SIGTERM");
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to bind Ctrl+C");
        }

        tracing::info!("Shutdown signal received, notifying background workers");
        let _ = shutdown_tx_clone.send(());
    };

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = signal_fut => {
            tracing::info!("Signal handler completed; server stopped accepting new connections");
        }
    }

    // Give the dispatcher time to finish an in-flight cycle. An interrupted
    // cycle is safe anyway: pending rows are just reprocessed on next start.
    if let Some(handle) = dispatcher_handle {
        let shutdown_wait = Duration::from_secs(15);
        tracing::info!(
            "Waiting up to {}s for the reminder dispatcher to exit",
            shutdown_wait.as_secs()
        );
        let _ = tokio::time::timeout(shutdown_wait, handle).await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
