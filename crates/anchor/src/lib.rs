//! Persistent value store for anchor nodes.
//!
//! Anchor nodes are long-lived DHT participants that keep long-lived values on
//! disk. When such a node restarts, it puts every value it kept back onto the
//! network, byte for byte, so that data outlives the nodes that first held it.
//!
//! Wiring on a node:
//!
//! 1. [`PersistentStore::open`] the database, migrating older layouts.
//! 2. Register an [`AnchorHook`] as the DHT node's [`StoreObserver`].
//! 3. [`PersistentStore::restore_async`] to republish what survived the
//!    restart, and [`PersistentStore::spawn_cleanup_task`] to drop expired
//!    records.
//! 4. [`PersistentStore::close`] on shutdown.
//!
//! [`StoreObserver`]: strand_dht::StoreObserver

mod config;
mod error;
mod hook;
mod metrics;
mod record;
mod schema;
mod store;
mod tasks;

pub use config::{
    AnchorArgs, AnchorConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_DB_FILE, DEFAULT_PERSIST_CLASSES,
};
pub use error::{StoreError, StoreResult};
pub use hook::AnchorHook;
pub use record::StoredValueRecord;
pub use schema::{MigrationReport, SCHEMA_VERSION};
pub use store::{PersistentStore, StoreState, StoreStats};
pub use tasks::RestoreReport;
