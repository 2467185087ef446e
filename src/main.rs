use std::net::SocketAddr;
use std::process::ExitCode;

use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;

use tours_backend::{
    AppState,
    config::Config,
    db::DBClient,
    rate_limit::start_sweeper,
    routes,
    shutdown::Shutdown,
    tracing_config::init_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    // Dropping the guard flushes the log file, so it must outlive run().
    let _guard = init_tracing();

    let config = match Config::init() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    let hook_shutdown = shutdown.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("UNCAUGHT PANIC! Shutting down... {}", info);
        default_hook(info);
        hook_shutdown.trigger_fault();
    }));

    match run(config, shutdown.clone()).await {
        Ok(()) if shutdown.faulted() => ExitCode::FAILURE,
        Ok(()) => {
            tracing::info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let db_client = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(10).connect(url).await.map_err(|e| {
                tracing::error!("Failed to connect to the database: {:?}", e);
                e
            })?;
            tracing::info!("Connection to the database is successful!");
            DBClient::new(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            DBClient::memory()
        }
    };
    db_client.migrate().await?;

    let port = config.port;
    let app_state = AppState::new(config, db_client)?;

    // scheduler
    let _sweeper = start_sweeper(app_state.rate_limiter.clone()).await?;

    let app = routes::create_router(app_state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("Server is running on http://localhost:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.signal())
    .await?;

    Ok(())
}
