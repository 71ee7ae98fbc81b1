//! transfer-engine CLI
//!
//! Drives file copies through the event loop and the I/O pipelines.

use anyhow::{bail, Context};
use clap::Parser;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use transfer_engine::config::{parse_interval, parse_size, CliArgs, Commands, EngineConfig};
use transfer_engine::core::{LocalTransfer, TransferEvent, TransferOptions, TransferSummary, WorkerPool};
use transfer_engine::event::EventLoop;
use transfer_engine::progress::TransferProgress;

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(args: &CliArgs) {
    let default_level = match (args.quiet, args.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn run(args: CliArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_cli(&args)?;
    tracing::debug!("Configuration: {:?}", config);

    match &args.command {
        Commands::Copy {
            source,
            destination,
            text,
            preallocate,
            progress,
            progress_interval,
        } => {
            let options = TransferOptions {
                text_mode: *text,
                preallocate: *preallocate,
                progress_interval: parse_interval(progress_interval)?,
            };
            let progress = (*progress && !args.quiet).then(|| TransferProgress::new("Data "));

            let summary = copy(&config, source, destination, &options, progress)?;
            if !args.quiet {
                print_summary(&summary);
            }
            Ok(())
        }
        Commands::Bench { path, size } => cmd_bench(&config, path, size),
    }
}

fn copy(
    config: &EngineConfig,
    source: &Path,
    destination: &Path,
    options: &TransferOptions,
    progress: Option<TransferProgress>,
) -> anyhow::Result<TransferSummary> {
    let event_loop: EventLoop<TransferEvent> = EventLoop::with_config(&config.event_loop)?;
    let pool = WorkerPool::new(&config.pool)?;

    let (handler, done) = LocalTransfer::start(
        &event_loop,
        &pool,
        source,
        destination,
        options,
        &config.pipeline,
        progress,
    )?;

    let result = done.recv().context("transfer ended without a result")?;
    handler.remove();
    result.with_context(|| format!("copying {}", source.display()))
}

fn print_summary(summary: &TransferSummary) {
    println!("Source:      {}", summary.source.display());
    println!("Destination: {}", summary.destination.display());
    println!(
        "Bytes:       {} read, {} written",
        humansize::format_size(summary.bytes_read, humansize::BINARY),
        humansize::format_size(summary.bytes_written, humansize::BINARY)
    );
    println!("Elapsed:     {:.2?}", summary.elapsed);
    println!(
        "Throughput:  {}/s",
        humansize::format_size(summary.throughput() as u64, humansize::BINARY)
    );
}

fn cmd_bench(config: &EngineConfig, path: &Path, size: &str) -> anyhow::Result<()> {
    let size_bytes = match parse_size(size) {
        Ok(bytes) => bytes,
        Err(e) => bail!("invalid size '{}': {}", size, e),
    };

    println!("=== transfer-engine benchmark ===");
    println!(
        "Test file size: {}",
        humansize::format_size(size_bytes, humansize::BINARY)
    );
    println!(
        "Ring:           {} x {}",
        config.pipeline.slot_count,
        humansize::format_size(config.pipeline.slot_size as u64, humansize::BINARY)
    );
    println!("Path:           {:?}\n", path);

    std::fs::create_dir_all(path).with_context(|| format!("creating {}", path.display()))?;
    let source = path.join("bench_source.bin");
    let destination = path.join("bench_dest.bin");

    print!("Creating test file... ");
    std::io::stdout().flush()?;
    {
        let mut file = std::fs::File::create(&source)?;
        let chunk_size = 1024 * 1024;
        let chunk: Vec<u8> = (0..chunk_size).map(|i| (i % 256) as u8).collect();
        let mut remaining = size_bytes;

        while remaining > 0 {
            let to_write = (remaining as usize).min(chunk_size);
            file.write_all(&chunk[..to_write])?;
            remaining -= to_write as u64;
        }
        file.sync_all()?;
    }
    println!("done\n");

    for (label, preallocate) in [("Pipeline copy", false), ("Preallocated", true)] {
        let options = TransferOptions {
            preallocate,
            ..Default::default()
        };
        let start = Instant::now();
        let summary = copy(config, &source, &destination, &options, None)?;
        let duration = start.elapsed();

        println!("{}:", label);
        println!("  Duration:   {:.2?}", duration);
        println!(
            "  Throughput: {}/s",
            humansize::format_size(summary.throughput() as u64, humansize::BINARY)
        );
        std::fs::remove_file(&destination).ok();
    }

    std::fs::remove_file(&source).ok();
    Ok(())
}
