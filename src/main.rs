use std::net::SocketAddr;

use anyhow::Result;
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use heartline::config::AppConfig;
use heartline::db;
use heartline::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heartline=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let pool = db::create_pool(&config).await?;
    db::health_check(&pool).await?;
    tracing::info!("Database connection pool ready");

    if config.run_migrations {
        db::run_migrations(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    let state = AppState::new(pool, config)?;
    let app = heartline::app(state);

    tracing::info!("🧠 Server running at {}", addr);

    axum::serve(TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
