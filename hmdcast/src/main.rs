//! hmdcast entry point.
//!
//! ```text
//! hmdcast                              Cast frames using hmdcast.toml
//! hmdcast --config <path>              Load a custom config TOML
//! hmdcast --address '>tcp://h:p'       Override the publish address
//! hmdcast --gen-config [path]          Write default config to stdout or a file
//! hmdcast --subscribe tcp://h:p        Print received frames as JSON
//! ```

use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hmdcast::config::{CasterConfig, LoggingConfig};
use hmdcast::dump;
use hmdcast::service::CasterService;
use hmdcast_core::TOPIC;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "hmdcast", about = "Head-mounted camera frame caster")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "hmdcast.toml")]
    config: PathBuf,

    /// Publish address, overriding `[network].address`.
    #[arg(short, long)]
    address: Option<String>,

    /// Write the default configuration to PATH (or stdout) and exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    gen_config: Option<Option<PathBuf>>,

    /// Subscribe to a caster at this address and print frames instead.
    #[arg(long, value_name = "ADDRESS")]
    subscribe: Option<String>,

    /// Topic prefix for `--subscribe`.
    #[arg(long, default_value = TOPIC)]
    topic: String,

    /// Stop `--subscribe` after this many frames.
    #[arg(long)]
    count: Option<u64>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    match cli.gen_config {
        Some(Some(path)) => {
            CasterConfig::write_default(&path)?;
            println!("default config written to {}", path.display());
            return Ok(());
        }
        Some(None) => {
            let text = toml::to_string_pretty(&CasterConfig::default())?;
            println!("{text}");
            return Ok(());
        }
        None => {}
    }

    let mut config = CasterConfig::load(&cli.config);
    if let Some(address) = cli.address {
        config.network.address = address;
    }

    init_tracing(&config.logging)?;
    info!("hmdcast v{}", env!("CARGO_PKG_VERSION"));

    // --subscribe: act as a monitoring client.
    if let Some(address) = cli.subscribe {
        tokio::select! {
            result = dump::run(&address, &cli.topic, cli.count) => result?,
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C received; stopping"),
        }
        return Ok(());
    }

    info!("publish address: {}", config.network.address);
    info!(
        "target: {}x{} @ {} fps max, format {}, {} readback",
        config.capture.initial_width,
        config.capture.initial_height,
        config.capture.max_frame_rate,
        if config.capture.in_bgr { "bgr" } else { "rgb" },
        if config.capture.record_async { "async" } else { "sync" },
    );

    let service = CasterService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received; shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}

/// Install the `fmt` subscriber: `RUST_LOG` wins over the configured
/// level, and a configured file replaces stderr.
fn init_tracing(logging: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}
