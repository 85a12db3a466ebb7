use notes_share::{
    AppState,
    config::{AppConfig, Env},
    create_router, database,
    repository::{PostgresRepository, RepositoryState},
    storage::{LocalFileStore, StorageState},
    token::TokenService,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Boots configuration, logging, the database (with migrations), upload storage and the
/// HTTP server, then serves until Ctrl-C or SIGTERM.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: pretty locally, JSON in production
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "notes_share=debug,tower_http=info".into());
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Database
    let pool = match database::connect_with_retry(
        &config.db_url,
        config.db_connect_attempts,
        config.db_connect_backoff,
    )
    .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "FATAL: could not connect to Postgres. Check DATABASE_URL.");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!(error = %e, "FATAL: database migration failed");
        std::process::exit(1);
    }

    let repo = Arc::new(PostgresRepository::new(pool.clone())) as RepositoryState;

    // 4. Upload storage
    let file_store = LocalFileStore::new(config.upload_dir.clone(), &config.public_base_url);
    if let Err(e) = file_store.ensure_root_exists().await {
        tracing::error!(error = %e, dir = %config.upload_dir.display(), "FATAL: upload directory unavailable");
        std::process::exit(1);
    }
    let storage = Arc::new(file_store) as StorageState;

    // 5. Tokens
    let tokens = Arc::new(TokenService::new(&config.jwt_secret));

    // 6. Router and server
    let bind_addr = config.bind_addr.clone();
    let public_base_url = config.public_base_url.clone();
    let app = create_router(AppState {
        repo,
        storage,
        tokens,
        config,
    });

    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %bind_addr, "FATAL: could not bind listener");
            std::process::exit(1);
        }
    };

    tracing::info!("Listening on {bind_addr}");
    tracing::info!("API Documentation (Swagger UI) available at: {public_base_url}/swagger-ui");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    pool.close().await;
    tracing::info!("Shutdown complete");
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
