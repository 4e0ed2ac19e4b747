//! fxrelay binary
//!
//! Connects to the requests WebSocket and answers conversion requests with
//! stakes converted to Euros.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fxrelay_common::system_clock;
use fxrelay_fx::{
    Converter, FreeCurrencyApiProvider, MemoryRateStore, RateCache, RateCacheConfig, RateStore,
    RedisRateStore,
};
use fxrelay_relay::{
    ConnectionSupervisor, LogFormat, RelayConfig, SupervisorConfig, WsConnector,
};

/// Currency-conversion relay
#[derive(Parser, Debug)]
#[command(name = "fxrelay")]
#[command(about = "Converts stakes in streamed requests to Euros")]
struct Args {
    /// WebSocket URL of the requests endpoint (overrides REQUESTS_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,

    /// Emit JSON log lines (overrides LOG_FORMAT)
    #[arg(long)]
    json_logs: bool,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let loaded = RelayConfig::from_env();
    let (level, format) = match &loaded {
        Ok(config) => (config.log_level.clone(), config.log_format),
        Err(_) => ("info".to_string(), LogFormat::Plain),
    };
    init_tracing(&level, if args.json_logs { LogFormat::Json } else { format });

    let mut config = loaded.map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    if let Some(url) = args.ws_url {
        config.ws_url = url;
    }
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    if args.check_config {
        info!(ws_url = %config.ws_url, "Configuration is valid");
        return Ok(());
    }

    info!(
        ws_url = %config.ws_url,
        provider = %config.provider.base_url,
        cache_ttl = ?config.cache.ttl,
        retry_message_ttl = ?config.retry_message_ttl,
        "Starting fxrelay"
    );

    let clock = system_clock();

    let provider = Arc::new(
        FreeCurrencyApiProvider::new(
            config.provider.base_url.clone(),
            config.provider.api_key.clone(),
            config.provider.timeout,
        )
        .context("building rate provider")?,
    );

    let store: Arc<dyn RateStore> = match &config.cache.redis_url {
        Some(url) => Arc::new(
            RedisRateStore::new(url, config.cache.timeout).context("configuring Redis store")?,
        ),
        None => {
            warn!("REDIS_URL not set, caching rates in memory");
            Arc::new(MemoryRateStore::new(clock.clone()))
        }
    };

    let cache = Arc::new(RateCache::new(
        store,
        provider,
        RateCacheConfig {
            ttl: config.cache.ttl,
            ..Default::default()
        },
    ));
    let converter = Arc::new(Converter::new(cache, clock.clone()));
    let connector = Arc::new(WsConnector::new(config.ws_url.clone(), config.connect_timeout));

    let supervisor =
        ConnectionSupervisor::new(connector, converter, SupervisorConfig::from(&config), clock);
    let shutdown = supervisor.shutdown_handle();
    let metrics = supervisor.metrics();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                shutdown.shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let result = supervisor.run().await;

    info!(metrics = ?metrics.snapshot(), "fxrelay stopped");

    result.map_err(|e| {
        error!(code = e.error_code(), error = %e, "Fatal error");
        anyhow::Error::from(e)
    })
}
