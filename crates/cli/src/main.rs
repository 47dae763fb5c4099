mod config_commands;

use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    trawl_browser::{BrowserConfig, CdpSessionProvider},
};

#[derive(Parser)]
#[command(name = "trawl", about = "trawl: headless browser scraping service", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
    /// DevTools WebSocket URL of a running browser (overrides config value).
    #[arg(long, global = true, env = "TRAWL_BROWSER_ENDPOINT")]
    browser_endpoint: Option<String>,
    /// Custom config directory (overrides default ~/.config/trawl/).
    #[arg(long, global = true, env = "TRAWL_CONFIG_DIR")]
    config_dir: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scraping service (default when no subcommand is provided).
    Serve,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    init_telemetry(&cli);

    if let Some(ref dir) = cli.config_dir {
        trawl_config::set_config_dir(dir.clone());
    }

    match cli.command.take() {
        None | Some(Commands::Serve) => serve(cli).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action),
    }
}

async fn serve(cli: Cli) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "trawl starting");

    let mut config = trawl_config::discover_and_load();

    // CLI args override config values
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(endpoint) = cli.browser_endpoint {
        config.browser.endpoint = Some(endpoint);
    }

    let provider = Arc::new(CdpSessionProvider::new(BrowserConfig::from(&config.browser)));
    let shutdown = CancellationToken::new();

    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
        }
        token.cancel();
    });

    trawl_gateway::start_gateway(&config, provider, shutdown).await
}
