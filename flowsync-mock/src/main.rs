use std::sync::Arc;

use clap::Parser;
use flowsync_core::FlowsyncConfig;
use flowsync_mock::{start_mock_server, MockBackend};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "flowsync.toml")]
    config: String,

    /// Override `mock.port`
    #[arg(long)]
    port: Option<u16>,

    /// Override `mock.flaky_every`
    #[arg(long)]
    flaky_every: Option<u32>,

    /// Start with no seeded workflows or agents
    #[arg(long)]
    empty: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = match FlowsyncConfig::load_or_default(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let mut mock = config.mock.clone();
    if let Some(port) = args.port {
        mock.port = port;
    }
    if let Some(n) = args.flaky_every {
        mock.flaky_every = n;
    }

    let backend = if args.empty {
        MockBackend::new(&mock)
    } else {
        MockBackend::seeded(&mock)
    };
    tracing::info!(
        steps_per_phase = mock.steps_per_phase,
        flaky_every = mock.flaky_every,
        "Mock backend ready"
    );

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = tx.send(());
    });

    start_mock_server(Arc::new(backend), &mock, rx).await?;

    tracing::info!("Mock server stopped");
    Ok(())
}
