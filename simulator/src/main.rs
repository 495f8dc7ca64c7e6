use anyhow::Context;
use clap::Parser;
use pqcore::publish::{ChannelObserver, PublishedResult, SinkRegistry};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use tokio::sync::mpsc::UnboundedReceiver;
use workflow::config::FlowgraphConfig;
use workflow::runner::Runner;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Three-phase power-quality flowgraph driver")]
struct Args {
    /// Load a flowgraph config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Blocks to process; 0 runs until Ctrl+C
    #[arg(long, default_value_t = 100)]
    blocks: usize,
    #[arg(long, default_value_t = 10_000.0)]
    sample_rate: f32,
    #[arg(long, default_value_t = 50.0)]
    mains_frequency: f64,
    /// Gaussian noise relative to the signal amplitude
    #[arg(long, default_value_t = 0.0)]
    noise: f64,
    #[arg(long, default_value = "energy_checkpoint.txt")]
    checkpoint: PathBuf,
    /// Write every published result as one JSON line
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = if let Some(path) = args.config.as_ref() {
        FlowgraphConfig::load(path)?
    } else {
        FlowgraphConfig::from_args(
            args.blocks,
            args.sample_rate,
            args.mains_frequency,
            args.noise,
            args.checkpoint.clone(),
        )
    };

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating runtime")?;
    runtime.block_on(drive(Runner::new(config), args.output))
}

async fn drive(runner: Runner, output: Option<PathBuf>) -> anyhow::Result<()> {
    let writer = match output.as_ref() {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };
    log::info!(
        "running {} blocks of {} samples at {} Hz",
        runner.config().blocks,
        runner.config().generator.block_size,
        runner.config().generator.sample_rate
    );

    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    let consumer = tokio::spawn(consume(receiver, writer));

    let stop = Arc::new(AtomicBool::new(false));
    let interrupt = Arc::clone(&stop);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received; stopping after the current block");
            interrupt.store(true, Ordering::Relaxed);
        }
    });

    let observer = Arc::new(ChannelObserver::new(sender));
    let worker_stop = Arc::clone(&stop);
    let summary = tokio::task::spawn_blocking(move || {
        runner.run(SinkRegistry::global(), observer, &worker_stop)
    })
    .await
    .context("flowgraph worker panicked")??;

    let delivered = consumer.await.context("result consumer panicked")??;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    log::info!("{} results delivered", delivered);
    Ok(())
}

/// Drains published results until every sink is gone.
async fn consume(
    mut receiver: UnboundedReceiver<PublishedResult>,
    mut writer: Option<BufWriter<File>>,
) -> anyhow::Result<usize> {
    let mut delivered = 0usize;
    while let Some(result) = receiver.recv().await {
        delivered += 1;
        if let Some(writer) = writer.as_mut() {
            serde_json::to_writer(&mut *writer, &result).context("encoding result")?;
            writer.write_all(b"\n").context("writing result")?;
        }
    }
    if let Some(mut writer) = writer {
        writer.flush().context("flushing results")?;
    }
    Ok(delivered)
}
