use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumen::{
    auth::TokenService,
    cache::KvCache,
    config::Config,
    database::Database,
    gateway::{
        rate_limit::{MemoryRateLimitStore, RedisRateLimitStore},
        GatewayServer, RateLimitStore,
    },
    queue::TaskQueue,
    storage::ObjectStore,
    web::{AppState, WebServer},
    worker::WorkerService,
};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(version)]
#[command(about = "Multi-tenant image generation platform")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Run the edge gateway
    Gateway,
    /// Run the job submission / status API
    Api,
    /// Run a GPU worker
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("lumen={}", cli.log_level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting lumen v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;

    match cli.role {
        Role::Gateway => {
            if let Some(host) = cli.host {
                config.gateway.host = host;
            }
            if let Some(port) = cli.port {
                config.gateway.port = port;
            }

            let limiter: Arc<dyn RateLimitStore> = if config.gateway.shared_rate_limit {
                let cache = KvCache::connect(&config.redis.url).await?;
                Arc::new(RedisRateLimitStore::new(
                    cache,
                    config.gateway.rate_limit_per_minute,
                ))
            } else {
                Arc::new(MemoryRateLimitStore::new(
                    config.gateway.rate_limit_per_minute,
                ))
            };

            let server = GatewayServer::new(&config, limiter)?;
            info!("Gateway listening on {}:{}", server.host(), server.port());
            server.serve().await?;
        }
        Role::Api => {
            if let Some(host) = cli.host {
                config.web.host = host;
            }
            if let Some(port) = cli.port {
                config.web.port = port;
            }

            let database = Database::new(&config.database).await?;
            database.migrate().await?;
            info!("Database connection established and migrations applied");

            let queue = TaskQueue::connect(&config.queue).await?;
            let cache = KvCache::connect(&config.redis.url).await?;
            let storage = ObjectStore::new(&config.object_store);
            storage.ensure_bucket().await?;
            let tokens = TokenService::new(&config.auth);

            let server = WebServer::new(AppState {
                database,
                queue,
                cache,
                storage,
                tokens,
                config,
            })?;
            info!("API listening on {}:{}", server.host(), server.port());
            server.serve().await?;
        }
        Role::Worker => {
            let worker = WorkerService::new(&config).await?;
            worker.run().await?;
        }
    }

    Ok(())
}
