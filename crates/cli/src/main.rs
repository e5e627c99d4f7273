use std::{path::PathBuf, time::Duration};

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use chatr_config::ChatrConfig;

#[derive(Parser)]
#[command(name = "chatr", about = "Chatr — ephemeral random chat fabric")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery in ./ and ./config/).
    #[arg(long, global = true, env = "CHATR_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat server instance.
    Chat,
    /// Start a match server instance.
    Match,
    /// Start a forwarder server instance.
    Forwarder,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = match load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        },
    };

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let result = match cli.command {
        Commands::Chat => chatr_chat::run(config, shutdown).await,
        Commands::Match => chatr_match::run(config, shutdown).await,
        Commands::Forwarder => chatr_forwarder::run(config, shutdown).await,
    };

    if let Err(e) = result {
        error!(error = %e, "server failed");
        std::process::exit(1);
    }
}

fn load(cli: &Cli) -> anyhow::Result<ChatrConfig> {
    match &cli.config {
        Some(path) => chatr_config::load_config(path),
        None => chatr_config::discover_and_load(),
    }
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

/// First signal starts the graceful stop; if teardown stalls past the
/// grace period the process exits hard.
fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        warn!("graceful stop timed out");
        std::process::exit(1);
    });
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            },
            Err(_) => {
                let _ = ctrl_c.await;
            },
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
