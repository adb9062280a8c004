use anyhow::Context;
use application::UserApp;
use config::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment variables
    let config = Config::from_env(None).context("loading configuration")?;

    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        database = %config.database_path,
        pool_size = config.database_pool_size,
        bcrypt_cost = config.bcrypt_cost,
        "configuration loaded"
    );

    let app = UserApp::new(&config).context("opening user store")?;
    let users = app
        .user_service
        .get_all_users()
        .await
        .context("reading user store")?;
    tracing::info!(users = users.len(), "user store ready");

    // Keep the store open until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    Ok(())
}
