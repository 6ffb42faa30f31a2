//! procnode server binary
//!
//! ## Usage
//!
//! ```bash
//! procnode-server                          # defaults
//! procnode-server --config server.ron
//! procnode-server --listen 0.0.0.0:7077 --root /editor
//! ```
//!
//! Then, for example:
//!
//! ```bash
//! printf 'ls /server\ncat /server/version\n' | nc 127.0.0.1 7077
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use procnode_kernel::ProcRouter;
use procnode_server::{BuiltinNodes, ProcServer, ServerConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Serve live process state as a synthetic file tree.
#[derive(Parser, Debug)]
#[command(name = "procnode-server", version)]
#[command(about = "Serve live process state as a synthetic file tree")]
struct Args {
    /// RON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Directory for the built-in nodes, overrides the config file
    #[arg(long)]
    root: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(root) = args.root {
        config.root = root;
    }

    let router = Arc::new(ProcRouter::with_config(config.proc.clone()));
    let builtins = BuiltinNodes::install(&router, &config.root)
        .with_context(|| format!("publishing built-in nodes under {}", config.root))?;
    let builtins = Arc::new(builtins);
    let ticker = config
        .tick_interval()
        .map(|interval| builtins.spawn_ticker(interval));

    let server = ProcServer::bind(&config.listen, router.clone())
        .await
        .with_context(|| format!("binding {}", config.listen))?;

    let result = tokio::select! {
        result = server.run() => result.context("server stopped"),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            signal.context("waiting for ctrl-c")
        }
    };

    if let Some(ticker) = ticker {
        ticker.abort();
    }
    builtins.uninstall(&router);
    result
}
