//! Configuration settings for the transfer engine
//!
//! Defines the CLI arguments, the serializable runtime configuration and
//! their defaults.

use crate::error::{EngineError, IoResultExt, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default number of slots in an I/O pipeline ring
pub const DEFAULT_SLOT_COUNT: usize = 8;

/// Default size of a single pipeline slot (256 KiB)
pub const DEFAULT_SLOT_SIZE: usize = 256 * 1024;

/// Floor for the auto-detected pool size; a copy alone holds two workers
pub const MIN_AUTO_THREADS: usize = 4;

/// Default distance past a deadline at which a timer is treated as skewed
pub const DEFAULT_CLOCK_SKEW_THRESHOLD: Duration = Duration::from_secs(60);

/// transfer-engine - event loop and double-buffered file transfer core
#[derive(Parser, Debug, Clone)]
#[command(name = "transfer-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Double-buffered file transfers driven by a single event loop")]
#[command(long_about = r#"
Runs file transfers through the engine core: a single event loop thread
serializes all callbacks while disk I/O happens on pooled worker threads,
exchanging fixed-size buffers through a bounded ring.

Examples:
  transfer-engine copy ./src.bin ./dst.bin                # Binary copy
  transfer-engine copy notes.txt wire.txt --text          # Text mode
  transfer-engine copy a b --slots 4 --slot-size 1M -p    # Custom ring
  transfer-engine bench /tmp --size 256M                  # Throughput test
"#)]
pub struct CliArgs {
    /// Path to a JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of slots in each I/O ring
    #[arg(long, global = true, value_name = "NUM")]
    pub slots: Option<usize>,

    /// Size of each ring slot (e.g., 256K, 1M)
    #[arg(long, global = true, value_name = "SIZE")]
    pub slot_size: Option<String>,

    /// Maximum number of pooled worker threads (0 = auto-detect)
    #[arg(short = 't', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Copy a file through a read pipeline and a write pipeline
    #[command(name = "copy")]
    Copy {
        /// Source file
        source: PathBuf,
        /// Destination file
        destination: PathBuf,
        /// Text mode: convert line endings between host and CRLF wire format
        #[arg(long)]
        text: bool,
        /// Pre-allocate the destination to the source size
        #[arg(long)]
        preallocate: bool,
        /// Show a progress bar
        #[arg(short = 'p', long)]
        progress: bool,
        /// Progress refresh interval (e.g., 100ms, 1s)
        #[arg(long, default_value = "100ms", value_name = "DURATION")]
        progress_interval: String,
    },

    /// Measure pipeline throughput with a generated file
    #[command(name = "bench")]
    Bench {
        /// Directory for benchmark files
        path: PathBuf,
        /// Test file size
        #[arg(long, default_value = "64M")]
        size: String,
    },
}

/// Ring sizing for the asynchronous I/O pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of slots in the ring
    pub slot_count: usize,
    /// Size of each slot in bytes
    pub slot_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            slot_size: DEFAULT_SLOT_SIZE,
        }
    }
}

impl PipelineConfig {
    /// Create a config with the given ring shape
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        Self {
            slot_count,
            slot_size,
        }
    }

    /// Check that the ring can make progress
    pub fn validate(&self) -> Result<()> {
        if self.slot_count < 2 {
            return Err(EngineError::config(format!(
                "slot count must be at least 2, got {}",
                self.slot_count
            )));
        }
        // Text-mode reads expand into half-filled slots
        if self.slot_size < 2 {
            return Err(EngineError::config(format!(
                "slot size must be at least 2 bytes, got {}",
                self.slot_size
            )));
        }
        Ok(())
    }

    /// Total memory held by one ring
    pub fn ring_bytes(&self) -> usize {
        self.slot_count * self.slot_size
    }
}

/// Worker pool limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrently running tasks (0 = number of CPUs, at least 4)
    pub max_threads: usize,
}

impl PoolConfig {
    /// Resolve the auto-detect setting
    pub fn effective_threads(&self) -> usize {
        if self.max_threads == 0 {
            num_cpus::get().max(MIN_AUTO_THREADS)
        } else {
            self.max_threads
        }
    }
}

/// Event loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Overdue distance (ms) past which a timer is rescheduled instead of fired
    pub clock_skew_threshold_ms: u64,
    /// Name given to the loop thread
    pub thread_name: String,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            clock_skew_threshold_ms: DEFAULT_CLOCK_SKEW_THRESHOLD.as_millis() as u64,
            thread_name: "event-loop".to_string(),
        }
    }
}

impl LoopConfig {
    /// Clock skew threshold as a duration
    pub fn clock_skew_threshold(&self) -> Duration {
        Duration::from_millis(self.clock_skew_threshold_ms)
    }
}

/// Runtime configuration for the whole engine core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// I/O ring sizing
    pub pipeline: PipelineConfig,
    /// Worker pool limits
    pub pool: PoolConfig,
    /// Event loop settings
    pub event_loop: LoopConfig,
}

impl EngineConfig {
    /// Load a config from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).with_path(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.pipeline.validate()?;
        Ok(config)
    }

    /// Build the config from CLI arguments, layered over an optional file
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(slots) = args.slots {
            config.pipeline.slot_count = slots;
        }
        if let Some(size) = &args.slot_size {
            config.pipeline.slot_size = parse_size(size)
                .map_err(|e| EngineError::config(format!("Invalid slot size: {}", e)))?
                as usize;
        }
        if let Some(threads) = args.threads {
            config.pool.max_threads = threads;
        }

        config.pipeline.validate()?;
        Ok(config)
    }
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Assume bytes if no suffix
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;

    Ok((num * multiplier as f64) as u64)
}

/// Parse a human-readable duration such as `100ms` or `2s`
pub fn parse_interval(value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| EngineError::config(format!("Invalid duration '{}': {}", value, e)))
}
