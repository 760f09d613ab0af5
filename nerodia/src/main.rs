use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use nerodia::config::ConfigDocument;
use nerodia::logging::init_logging;
use nerodia::registry::{ComponentServices, Registry};
use nerodia::{App, panic_hook};
use nerodia_platforms::http::{DEFAULT_TIMEOUT, build_client};

/// Announce Twitch streams through a Discord bot.
#[derive(Parser, Debug)]
#[command(name = "nerodia", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, env = "NERODIA_CONFIG", default_value = "config.yml")]
    config: PathBuf,

    /// Also write daily-rolling log files to this directory.
    #[arg(long, env = "NERODIA_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads its env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let (logging, _guard) = init_logging(cli.log_dir.as_deref())?;
    panic_hook::install(cli.log_dir.as_deref());

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.child_token());

    info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "Starting nerodia");

    let document = ConfigDocument::load(&cli.config)?;
    let services = ComponentServices::new(build_client(DEFAULT_TIMEOUT)?).with_logging(logging);
    let app = App::build(&document, &Registry::with_defaults(), services)?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        signal_token.cancel();
    });

    let result = app.run(shutdown.clone()).await;
    shutdown.cancel();
    Ok(result?)
}
