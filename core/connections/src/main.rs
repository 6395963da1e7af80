use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use thoughtmap_connections::{llm_providers::provider_from_config, router, AppState, ServiceConfig};
use thoughtmap_schemas::UserId;
use thoughtmap_store::Database;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "thoughtmap-connections")]
#[command(about = "Connection discovery and cluster service for Thoughtmap")]
struct Args {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<String>,

    /// Path to SQLite database file (overrides DB_PATH)
    #[arg(long, short)]
    db_path: Option<PathBuf>,

    /// Print a new API token for this user id and exit
    #[arg(long, value_name = "USER_ID")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServiceConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(db_path) = args.db_path {
        config.db_path = db_path;
    }

    info!("Thoughtmap Connections Service v{}", env!("CARGO_PKG_VERSION"));

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = Database::new(&config.db_path)?;
    info!("Database initialized at: {}", config.db_path.display());

    if let Some(user) = args.issue_token {
        let token = db.issue_api_token(&UserId(user))?;
        println!("{}", token);
        return Ok(());
    }

    if config.llm.api_key.is_none() {
        warn!(
            "{} is not set; connection discovery will fail until it is",
            config.llm.api_key_var()
        );
    }

    let model = provider_from_config(&config.llm)?;
    let state = AppState::new(db, model, config.discovery.clone());
    let app = router(state);

    info!("Starting HTTP server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
