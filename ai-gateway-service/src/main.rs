//! AI Gateway Service Binary.
//!
//! Composition root: parses CLI arguments, loads configuration, builds a
//! single shared `ProviderProxy`, seeds its repository from config, and
//! serves the two-route HTTP surface over axum.
//!
//! ## Usage
//!
//! ```bash
//! ai-gateway-service --config config.toml
//! ai-gateway-service --host 0.0.0.0 --port 8080 --log-level debug
//! ```

use ai_gateway_core::metrics::MetricsCollector;
use ai_gateway_core::proxy::ProviderProxy;
use ai_gateway_core::repository::{
    InMemoryProviderConfigRepository, ProviderConfigRepository, SqlxProviderConfigRepository,
};
use ai_gateway_service::config::Config;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Port number for the HTTP server. Overrides the config file value.
    #[arg(short, long)]
    port: Option<u16>,

    /// Host address to bind the server to. Overrides the config file value.
    #[arg(long)]
    host: Option<String>,

    /// Logging level for the application.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let repository: Arc<dyn ProviderConfigRepository> = match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to provider config database");
            Arc::new(SqlxProviderConfigRepository::connect(url).await?)
        }
        None => {
            tracing::info!("no database_url configured, using in-memory provider repository");
            Arc::new(InMemoryProviderConfigRepository::new())
        }
    };

    for seed in config.providers.clone() {
        let provider_id = seed.provider_id.clone();
        if let Err(e) = repository.create(seed.into_record()).await {
            tracing::warn!(provider_id, error = %e, "failed to seed provider configuration");
        }
    }

    let metrics = Arc::new(MetricsCollector::noop());
    let proxy = Arc::new(ProviderProxy::new(repository, metrics));

    if !Config::health_checks_disabled() {
        proxy.spawn_health_loop(None);
    } else {
        tracing::info!("DISABLE_HEALTH_CHECKS set, skipping background health loop");
    }

    let app = ai_gateway_service::server::create_server(proxy);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "starting ai-gateway-service");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
