//! On-disk schema and the legacy migration.
//!
//! Version 1 keyed rows by `(key, created_at)`, so two republications of the
//! same slot at different times produced two rows. Version 2 keys rows by
//! `(key, value_id)`. redb cannot rename tables, so migration copies rows
//! into the version 2 table and deletes the legacy one, all inside a single
//! write transaction.

use redb::{Database, ReadableTable, TableDefinition, TableHandle, WriteTransaction};
use strand_dht::{PackedValue, TtlClass};
use tracing::{debug, info, warn};

use crate::{
    StoreError, StoreResult,
    record::{LegacyRecordBody, RecordBody},
};

/// Current table. Key: `(key hash, value id)`, value: postcard [`RecordBody`].
pub(crate) const VALUES_TABLE: TableDefinition<(&[u8; 32], u64), &[u8]> =
    TableDefinition::new("stored_values");

/// Legacy table. Key: `(key hash, created_at)`, value: postcard [`LegacyRecordBody`].
pub(crate) const LEGACY_VALUES_TABLE: TableDefinition<(&[u8; 32], u64), &[u8]> =
    TableDefinition::new("values");

const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Schema version written by this crate.
pub const SCHEMA_VERSION: u64 = 2;

/// Summary of a legacy migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Rows copied into the current table.
    pub migrated: u64,
    /// Older rows dropped because a newer row had the same `(key, value_id)`.
    pub duplicates: u64,
    /// Rows that could not be decoded and were left behind.
    pub skipped: u64,
    /// Rows whose value id fell back to their creation time.
    pub id_fallbacks: u64,
}

/// Bring the database to [`SCHEMA_VERSION`], migrating legacy data if present.
///
/// Returns the migration summary when a migration ran. On error nothing has
/// been committed.
pub(crate) fn prepare(db: &Database) -> StoreResult<Option<MigrationReport>> {
    let (version, legacy) = inspect(db)?;
    if let Some(version) = version {
        if version > SCHEMA_VERSION {
            return Err(StoreError::Migration(format!(
                "schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
    }

    let txn = db.begin_write()?;
    let report = if legacy {
        let report = migrate(&txn).map_err(|err| match err {
            StoreError::Migration(_) => err,
            other => StoreError::Migration(other.to_string()),
        })?;
        Some(report)
    } else {
        let _ = txn.open_table(VALUES_TABLE)?;
        None
    };
    {
        let mut meta = txn.open_table(META_TABLE)?;
        meta.insert(SCHEMA_VERSION_KEY, SCHEMA_VERSION)?;
    }
    txn.commit()?;

    if let Some(report) = &report {
        info!(
            migrated = report.migrated,
            duplicates = report.duplicates,
            skipped = report.skipped,
            id_fallbacks = report.id_fallbacks,
            "migrated legacy value table"
        );
    }
    Ok(report)
}

/// Stored schema version, if any, and whether the legacy table exists.
fn inspect(db: &Database) -> StoreResult<(Option<u64>, bool)> {
    let txn = db.begin_read()?;
    let mut has_meta = false;
    let mut legacy = false;
    for table in txn.list_tables()? {
        match table.name() {
            name if name == META_TABLE.name() => has_meta = true,
            name if name == LEGACY_VALUES_TABLE.name() => legacy = true,
            _ => {}
        }
    }

    let version = if has_meta {
        let meta = txn.open_table(META_TABLE)?;
        meta.get(SCHEMA_VERSION_KEY)?.map(|v| v.value())
    } else {
        None
    };
    debug!(?version, legacy, "inspected store schema");
    Ok((version, legacy))
}

/// Copy legacy rows into the current table, newest first per key, then drop
/// the legacy table.
fn migrate(txn: &WriteTransaction) -> StoreResult<MigrationReport> {
    let mut report = MigrationReport::default();
    {
        let legacy = txn.open_table(LEGACY_VALUES_TABLE)?;
        let mut current = txn.open_table(VALUES_TABLE)?;

        // Keys sort by (key hash, created_at); walking backwards visits each
        // key's rows newest first, so the first row per value id wins.
        for row in legacy.iter()?.rev() {
            let (key, value) = row?;
            let (key_hash, created_at) = key.value();
            let key_hash = *key_hash;

            let body = match LegacyRecordBody::decode(value.value()) {
                Ok(body) if TtlClass::from_u8(body.ttl_class).is_some() => body,
                Ok(body) => {
                    warn!(created_at, ttl_class = body.ttl_class, "skipping legacy row with unknown ttl class");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    warn!(created_at, error = %err, "skipping undecodable legacy row");
                    report.skipped += 1;
                    continue;
                }
            };

            let value_id = match PackedValue::peek_id(&body.packed_value) {
                Ok(id) => id,
                Err(err) => {
                    warn!(created_at, error = %err, "no value id in packed value, using created_at");
                    report.id_fallbacks += 1;
                    created_at
                }
            };

            if current.get((&key_hash, value_id))?.is_some() {
                report.duplicates += 1;
                continue;
            }

            let row = RecordBody {
                packed_value: body.packed_value,
                ttl_class: body.ttl_class,
                created_at,
                expires_at: body.expires_at,
            }
            .encode()?;
            current.insert((&key_hash, value_id), row.as_slice())?;
            report.migrated += 1;
        }
    }

    if !txn.delete_table(LEGACY_VALUES_TABLE)? {
        return Err(StoreError::Migration("legacy table vanished".to_string()));
    }
    Ok(report)
}
