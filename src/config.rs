//! Configuration
//!
//! Command line and environment settings for the `trellis` binary.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser};

use crate::{
    engine::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, EngineSettings},
    sequence::DEFAULT_SECONDS_PER_STEP,
};

/// Trellis offer stacking optimiser
#[derive(Debug, Parser)]
#[command(
    name = "trellis",
    about = "Find the best stack of offers for a purchase",
    long_about = None
)]
pub struct Cli {
    /// Scenario selection
    #[command(flatten)]
    pub scenario: ScenarioArgs,

    /// Engine settings
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Logging settings
    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Load configuration from environment and CLI arguments
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be parsed
    pub fn load() -> Result<Self, clap::Error> {
        // Load .env file if present (ignore if missing)
        _ = dotenvy::dotenv();

        Self::try_parse()
    }
}

/// Which scenario fixture to run.
#[derive(Debug, Args)]
pub struct ScenarioArgs {
    /// Scenario fixture name
    #[arg(short = 'f', long = "fixture", env = "TRELLIS_FIXTURE", default_value = "weekend-sale")]
    pub name: String,

    /// Directory holding `scenarios/<name>.yml`
    #[arg(long, env = "TRELLIS_FIXTURE_DIR", default_value = "./fixtures")]
    pub fixture_dir: PathBuf,

    /// Ignore the scenario's preference affinities
    #[arg(long, default_value_t = false)]
    pub no_personalization: bool,
}

/// Engine tuning.
#[derive(Debug, Args)]
pub struct EngineArgs {
    /// Maximum number of cached results
    #[arg(long, env = "TRELLIS_CACHE_CAPACITY", default_value_t = DEFAULT_CACHE_CAPACITY)]
    pub cache_capacity: usize,

    /// Cached result lifetime in seconds; 0 keeps results until evicted
    #[arg(long, env = "TRELLIS_CACHE_TTL_SECONDS", default_value_t = DEFAULT_CACHE_TTL.as_secs())]
    pub cache_ttl_seconds: u64,

    /// Seconds assumed per application step
    #[arg(long, env = "TRELLIS_SECONDS_PER_STEP", default_value_t = DEFAULT_SECONDS_PER_STEP)]
    pub seconds_per_step: u64,

    /// Combination search bound, overriding the scenario's
    #[arg(short = 'b', long, env = "TRELLIS_SEARCH_BOUND")]
    pub search_bound: Option<usize>,
}

impl EngineArgs {
    /// Engine settings described by these arguments.
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            cache_capacity: self.cache_capacity,
            cache_ttl: (self.cache_ttl_seconds > 0)
                .then_some(Duration::from_secs(self.cache_ttl_seconds)),
            seconds_per_step: self.seconds_per_step,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact, human-readable logs.
    Compact,

    /// Structured JSON logs.
    Json,
}

/// Logging settings.
#[derive(Debug, Args)]
pub struct LoggingArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RUST_LOG", default_value = "warn")]
    pub log_level: String,

    /// Log format (compact, json)
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}
