//! Relay server binary entry point.
//!
//! # Usage
//!
//! ```bash
//! # Start with a configuration file
//! cargo run --bin relay_server -- --config config.json
//!
//! # Override the listening port (also honours the PORT environment variable)
//! cargo run --bin relay_server -- --port 8080
//! ```

use clap::Parser;
use signal_relay::{Config, RelayServer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC signaling relay server
///
/// Address-brokered message relay over binary websocket frames.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json", env = "RELAY_CONFIG")]
    config: PathBuf,

    /// Override the listening port (deactivates TLS when both listeners
    /// are configured)
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging (same effect as log_verbose in the configuration)
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Set up Ctrl+C handling before anything binds
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        let was_already_set = shutdown_flag_handler.swap(true, Ordering::SeqCst);
        if was_already_set {
            eprintln!("shutdown already in progress, forcing immediate exit");
            std::process::exit(0);
        }
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (mut config, config_missing) = if args.config.exists() {
        (Config::from_file(&args.config)?, false)
    } else {
        (Config::default(), true)
    };

    init_tracing(args.verbose || config.log_verbose);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "signal relay starting"
    );
    if config_missing {
        warn!(config = %args.config.display(), "configuration file not found, using defaults");
    }

    if let Some(port) = args.port {
        config.apply_port_override(port);
    }
    config.apply_env_override();

    let server = RelayServer::new(config)?;
    let handle = server.start().await?;
    if let Some(addr) = handle.http_addr {
        info!(%addr, "listening (ws)");
    }
    if let Some(addr) = handle.https_addr {
        info!(%addr, "listening (wss)");
    }

    // Keep serving until the shutdown signal arrives
    while !shutdown_flag.load(Ordering::SeqCst) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    info!("shutdown signal received, stopping listeners");
    handle.shutdown().await;
    info!("relay stopped");

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
