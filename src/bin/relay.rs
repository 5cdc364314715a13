#![forbid(unsafe_code)]

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use cinerelay::{
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    history::SqliteHistory,
    relay::{RelayState, create_router},
    security::ensure_not_root,
    upstream::UreqUpstream,
};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve the origin-masking relay.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        help = "Path to the env config file"
    )]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Override RELAY_HOST")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Override RELAY_PORT")]
    port: Option<u16>,
    #[arg(
        long = "history-db",
        value_name = "PATH",
        help = "Override HISTORY_DB and enable the history routes"
    )]
    history_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinerelay=info,relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    ensure_not_root("relay")?;

    let mut runtime = load_runtime_config_from(&cli.config)?;
    if let Some(host) = cli.host {
        runtime.relay_host = host;
    }
    if let Some(port) = cli.port {
        runtime.relay_port = port;
    }
    if let Some(path) = cli.history_db {
        runtime.history_db = Some(path);
    }

    let mut state = RelayState::new(runtime.upstream.clone(), UreqUpstream::new())
        .with_token_ttl_ms(runtime.token_ttl_ms);
    if let Some(path) = &runtime.history_db {
        let store = SqliteHistory::open(path).context("initializing search history store")?;
        state = state.with_history(store);
    }

    let app = create_router(state);

    let addr = SocketAddr::new(
        runtime
            .relay_host
            .parse()
            .with_context(|| format!("parsing relay host {}", runtime.relay_host))?,
        runtime.relay_port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, token_ttl_ms = runtime.token_ttl_ms, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running relay server")?;

    tracing::info!("relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install Ctrl+C handler");
    }
}
