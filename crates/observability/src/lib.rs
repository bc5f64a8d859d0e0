//! Logging setup for strand nodes.
//!
//! Every crate in the workspace logs through `tracing`. A binary embedding
//! the storage engine flattens [`LogArgs`] into its command line and calls
//! [`init_logging`] once at startup.

use clap::Args;
use eyre::Result;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging configuration
#[derive(Debug, Args, Clone, Default)]
#[command(next_help_heading = "Logging")]
pub struct LogArgs {
    /// Silence everything below errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Emit logs as JSON lines
    #[arg(long = "log.json")]
    pub json: bool,

    /// Extra filter directives, comma separated
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    pub filter: Option<String>,
}

impl LogArgs {
    /// Filter directives implied by the flags, ignoring `RUST_LOG`.
    ///
    /// `--quiet` wins over everything else. Custom directives are appended
    /// after the base level so they can raise or lower individual targets.
    pub fn directives(&self) -> String {
        if self.quiet {
            return "error".to_string();
        }
        let base = match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        match self.filter.as_deref().map(str::trim) {
            Some(extra) if !extra.is_empty() => format!("{base},{extra}"),
            _ => base.to_string(),
        }
    }

    /// Directives in effect given the value of `RUST_LOG`.
    fn effective_directives(&self, rust_log: Option<String>) -> String {
        if self.quiet {
            return self.directives();
        }
        // RUST_LOG replaces the verbosity level but custom directives still apply.
        match rust_log.filter(|env| !env.trim().is_empty()) {
            Some(env) => match self.filter.as_deref().map(str::trim) {
                Some(extra) if !extra.is_empty() => format!("{env},{extra}"),
                _ => env,
            },
            None => self.directives(),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        EnvFilter::builder().parse_lossy(self.effective_directives(rust_log))
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(args: &LogArgs) -> Result<()> {
    let stdout_layer = fmt::Layer::new().with_target(true);
    let stdout_layer = if args.json {
        stdout_layer.json().boxed()
    } else {
        stdout_layer.boxed()
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(args.env_filter())
        .try_init()?;
    Ok(())
}
