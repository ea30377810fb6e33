//! EntryStor CLI
//!
//! Replays cache scenarios against an in-memory entry store and prints one
//! JSON line per step.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          entrystor                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Scenario   │───▶│ CacheService │───▶│  EntryStore  │       │
//! │  │   (YAML)     │    │   (fetch)    │    │  (per key)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use entrystor::cache::CacheConfig;
use entrystor::replay::{replay_file, Replayer};

// =============================================================================
// CLI Arguments
// =============================================================================

/// EntryStor - HTTP response cache entry store
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Flush barrier timeout in milliseconds (0 waits forever)
    #[arg(long, global = true, env = "ENTRYSTOR_FLUSH_TIMEOUT_MS", default_value = "30000")]
    flush_timeout_ms: u64,

    /// Reject alternative streams larger than this many bytes
    #[arg(long, global = true, env = "ENTRYSTOR_MAX_STREAM_BYTES")]
    max_stream_bytes: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "ENTRYSTOR_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "ENTRYSTOR_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a YAML scenario
    Replay {
        /// Scenario file
        file: PathBuf,

        /// Print Prometheus metrics after the replay
        #[arg(long)]
        print_metrics: bool,

        /// Persist through an in-memory backend so flush steps wait on
        /// the persistence barrier
        #[arg(long, env = "ENTRYSTOR_PERSIST")]
        persist: bool,
    },
}

impl Args {
    fn cache_config(&self) -> CacheConfig {
        let defaults = CacheConfig::default();
        CacheConfig {
            flush_timeout: match self.flush_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            max_stream_bytes: self.max_stream_bytes.or(defaults.max_stream_bytes),
            ..defaults
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;

    let config = args.cache_config();
    config.validate().context("invalid configuration")?;
    info!("Starting EntryStor");
    info!("  Flush timeout: {:?}", config.flush_timeout);
    info!("  Max stream bytes: {:?}", config.max_stream_bytes);

    match &args.command {
        Command::Replay {
            file,
            print_metrics,
            persist,
        } => {
            let replayer = if *persist {
                Replayer::with_persistence(config)
            } else {
                Replayer::new(config)
            };
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let replayer = replay_file(file, replayer, &mut out)
                .await
                .with_context(|| format!("replaying {}", file.display()))?;
            drop(out);

            if *print_metrics {
                let text = replayer
                    .service()
                    .metrics()
                    .encode_text()
                    .context("encoding metrics")?;
                print!("{}", text);
            }
            replayer
                .service()
                .shutdown()
                .await
                .context("stopping persistence writer")?;
            info!("Replay complete");
        }
    }

    Ok(())
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().context("invalid log directive")?);

    // Logs go to stderr so stdout stays a clean JSON-lines stream
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
