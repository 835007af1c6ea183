use std::{io::Read, path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use scene_split::{
    Config, Context, Mode,
    dispatch::{Invoker, MemoryInvoker, ProcessInvoker},
    handle_event,
    resources::blob::FsBlobStore,
    topology::MemoryBroker,
};

/// Partition a scene and start its render workers.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file. Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Trigger event as JSON, `-` reads it from stdin.
    #[arg(short, long, default_value = "-")]
    request: String,

    /// Only partition; don't provision queues or start workers.
    #[arg(long)]
    local: bool,

    /// Overrides `blob_root` from the configuration.
    #[arg(long)]
    blob_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = env_logger::try_init() {
        eprintln!("Warning: Could not initialize logger: {}", e);
    };
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.local {
        config.mode = Mode::Local;
    }
    if let Some(root) = &args.blob_root {
        config.blob_root = root.display().to_string();
    }

    let event = if args.request == "-" {
        let mut event = String::new();
        std::io::stdin()
            .read_to_string(&mut event)
            .context("failed to read the request from stdin")?;
        event
    } else {
        std::fs::read_to_string(&args.request)
            .with_context(|| format!("failed to read {}", args.request))?
    };

    let invoker: Arc<dyn Invoker> = match &config.worker_program {
        Some(program) => Arc::new(ProcessInvoker::new(program)),
        None => {
            if config.mode == Mode::Fleet {
                log::warn!("No worker_program configured, workers are only recorded");
            }
            Arc::new(MemoryInvoker::new())
        }
    };
    if config.mode == Mode::Fleet {
        log::warn!(
            "Queues and the channel live in an in-process broker; started workers can't reach them"
        );
    }
    let blob_store = Arc::new(FsBlobStore::new(&config.blob_root));
    let ctx = Context::new(config, blob_store, Arc::new(MemoryBroker::new()), invoker);

    let response = handle_event(&ctx, &event).await;
    println!("{}", serde_json::to_string(&response)?);
    if response.status_code != 200 {
        anyhow::bail!("run failed with status {}", response.status_code);
    }
    Ok(())
}
