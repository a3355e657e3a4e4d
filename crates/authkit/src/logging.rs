//! Logging setup for the bundled binaries.

use clap::Args;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Verbosity flags shared by every binary.
#[derive(Debug, Clone, Default, Args)]
pub struct LogOpts {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,
}

impl LogOpts {
    /// Level implied by the flags, falling back to the configured level.
    pub fn effective_level<'a>(&self, config: &'a LoggingConfig) -> &'a str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => config.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` wins over flags and config.
pub fn init_logging(opts: &LogOpts, config: &LoggingConfig) {
    let level = opts.effective_level(config);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!(
            "authkit={level},authkit_protocol={level},authkit_helper={level},authkitctl={level}"
        )));

    // Use JSON output if --json flag is set, otherwise pretty format
    if opts.json || config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .ok();
    }
}
