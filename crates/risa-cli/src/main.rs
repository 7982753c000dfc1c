use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use risa_core::ConfigReader;
use risa_device::MemoryPool;
use risa_receiver::Receiver;
use risa_recon::OfflineLoader;

mod chain;

#[derive(Parser)]
#[command(name = "risa", about = "Streaming fan-beam CT reconstruction")]
struct Cli {
    /// Path to the JSON configuration file.
    config: PathBuf,

    /// Replay a recorded raw capture instead of listening for UDP data.
    #[arg(long)]
    offline: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    // A panic anywhere in the stage graph is a fatal runtime error; abort
    // instead of leaving the chain wedged on a sentinel that never comes.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(%info, "fatal failure, terminating");
        std::process::abort();
    }));

    tracing::info!("risa v{}", env!("CARGO_PKG_VERSION"));

    let cfg = ConfigReader::from_file(&cli.config)?;
    let raw_pool = MemoryPool::<u16>::new();

    match &cli.offline {
        Some(capture) => {
            let loader = OfflineLoader::new(&cfg, Arc::clone(&raw_pool), capture)?;
            chain::run(&cfg, loader, raw_pool)?;
        }
        None => {
            let receiver = Receiver::new(&cfg, Arc::clone(&raw_pool))?;
            chain::run(&cfg, receiver, raw_pool)?;
        }
    }

    Ok(())
}
