//! fxrelay Simulator
//!
//! Stands in for the requests endpoint during development: accepts relay
//! connections, sends heartbeats and periodic conversion requests, and logs
//! whatever the relay answers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fxrelay_common::{parse_wire_datetime, Currency};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod request;
mod session;

use request::RequestGenerator;
use session::SessionConfig;

/// fxrelay Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "fxrelay-simulator")]
#[command(about = "Stand-in requests endpoint for fxrelay")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8765")]
    listen: SocketAddr,

    /// Seconds between conversion requests on each connection
    #[arg(long, default_value = "60")]
    request_interval: u64,

    /// Milliseconds between heartbeats
    #[arg(long, default_value = "1000")]
    heartbeat_interval_ms: u64,

    /// Never send heartbeats, so the relay's watchdog keeps firing
    #[arg(long)]
    no_heartbeat: bool,

    /// Currencies to request, comma separated
    #[arg(long, value_delimiter = ',', default_value = "USD")]
    currencies: Vec<Currency>,

    /// Requests are dated at random within five years of this instant
    #[arg(long, default_value = "2023-05-18T21:32:42.324Z")]
    anchor: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let anchor = parse_wire_datetime(&args.anchor)
        .with_context(|| format!("--anchor is not an ISO-8601 datetime: {}", args.anchor))?
        .with_timezone(&chrono::Utc);
    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let generator = Arc::new(Mutex::new(RequestGenerator::new(
        rng,
        anchor,
        chrono::Duration::days(5 * 365),
        args.currencies.clone(),
    )));

    let config = SessionConfig {
        heartbeat_interval: (!args.no_heartbeat)
            .then(|| Duration::from_millis(args.heartbeat_interval_ms.max(1))),
        request_interval: Duration::from_secs(args.request_interval.max(1)),
    };

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(
        url = %format!("ws://{}", args.listen),
        currencies = ?args.currencies,
        request_interval = ?config.request_interval,
        heartbeats = config.heartbeat_interval.is_some(),
        "Simulator listening"
    );

    tokio::select! {
        result = session::accept_loop(listener, config, generator) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
