//! Anchor store configuration.

use std::{path::PathBuf, time::Duration};

use clap::Args;
use serde::{Deserialize, Serialize};
use strand_dht::TtlClass;

/// Default database file name.
pub const DEFAULT_DB_FILE: &str = "anchor.redb";

/// Default interval between cleanup passes.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// TTL classes kept by default.
pub const DEFAULT_PERSIST_CLASSES: [TtlClass; 2] = [TtlClass::Year, TtlClass::Permanent];

/// What the persistent store needs from its configuration.
pub trait AnchorConfig {
    /// Location of the database file.
    fn db_path(&self) -> PathBuf;

    /// TTL classes worth keeping across restarts.
    fn persist_classes(&self) -> Vec<TtlClass>;

    /// Interval between periodic cleanup passes.
    fn cleanup_interval(&self) -> Duration;
}

/// Anchor node arguments.
#[derive(Debug, Args, Clone, Serialize, Deserialize)]
#[command(next_help_heading = "Anchor Store")]
#[serde(default)]
pub struct AnchorArgs {
    /// Path of the persistent value database.
    #[arg(long = "anchor.db-path", value_name = "PATH", default_value = DEFAULT_DB_FILE)]
    pub db_path: PathBuf,

    /// Seconds between cleanup passes over expired records.
    #[arg(long = "anchor.cleanup-interval-secs", default_value_t = DEFAULT_CLEANUP_INTERVAL.as_secs())]
    pub cleanup_interval_secs: u64,

    /// TTL classes persisted across restarts, comma separated.
    #[arg(
        long = "anchor.persist-classes",
        value_delimiter = ',',
        default_values_t = DEFAULT_PERSIST_CLASSES
    )]
    pub persist_classes: Vec<TtlClass>,
}

impl Default for AnchorArgs {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL.as_secs(),
            persist_classes: DEFAULT_PERSIST_CLASSES.to_vec(),
        }
    }
}

impl AnchorConfig for AnchorArgs {
    fn db_path(&self) -> PathBuf {
        self.db_path.clone()
    }

    fn persist_classes(&self) -> Vec<TtlClass> {
        self.persist_classes.clone()
    }

    fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}
