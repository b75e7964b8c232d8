//! Schema-version ledger: the durable record of applied migrations, kept in
//! the target keyspace itself.
//!
//! The table layout round-trips with ledgers written by the JVM tooling this
//! engine is compatible with: `installed_rank` is the partition key, a
//! secondary index on `version_rank` supports ordered reads, and a companion
//! `*_counts` counter table issues monotonically increasing ranks.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use scylla::frame::response::result::CqlValue;
use scylla::frame::value::{Counter, CqlTimestamp};
use scylla::Session;

use crate::db::{execute_statement, execute_with_values};
use crate::error::{Result, SextantError};
use crate::migration::MigrationType;
use crate::version::MigrationVersion;

/// Default ledger table base name, composed as `{table_prefix}{base}`.
pub const DEFAULT_TABLE_BASENAME: &str = "cassandra_migration_version";

const COUNTS_SUFFIX: &str = "_counts";
const RANK_COUNTER_NAME: &str = "installed_rank";

/// The advisory lock row lives in the reserved partition `installed_rank = 0`;
/// real ranks start at 1.
const LOCK_RANK: i32 = 0;
const LOCK_VERSION: &str = "?";
const LOCK_DESCRIPTION: &str = "lock";
const LOCK_MAX_ATTEMPTS: u32 = 10;

/// A row from the ledger table.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version_rank: i32,
    pub installed_rank: i32,
    pub version: MigrationVersion,
    pub description: String,
    pub migration_type: MigrationType,
    pub script: String,
    pub checksum: Option<i32>,
    pub installed_on: DateTime<Utc>,
    pub installed_by: String,
    pub execution_time_ms: i32,
    pub success: bool,
}

/// Data access over the ledger and its companion counter table.
pub struct SchemaVersionDao<'a> {
    session: &'a Session,
    keyspace: String,
    table: String,
    timeout: Duration,
}

type LedgerRow = (
    Option<i32>,          // version_rank
    Option<i32>,          // installed_rank
    Option<String>,       // version
    Option<String>,       // description
    Option<String>,       // type
    Option<String>,       // script
    Option<i32>,          // checksum
    Option<CqlTimestamp>, // installed_on
    Option<String>,       // installed_by
    Option<i32>,          // execution_time
    Option<bool>,         // success
);

impl<'a> SchemaVersionDao<'a> {
    pub fn new(session: &'a Session, keyspace: &str, table: &str, timeout: Duration) -> Self {
        Self {
            session,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            timeout,
        }
    }

    fn ledger_table(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    fn counts_table(&self) -> String {
        format!("{}.{}{}", self.keyspace, self.table, COUNTS_SUFFIX)
    }

    /// Create the ledger and counter tables. Idempotent.
    pub async fn create_tables_if_missing(&self) -> Result<()> {
        let ledger = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             version_rank int, \
             installed_rank int, \
             version text, \
             description text, \
             type text, \
             script text, \
             checksum int, \
             installed_on timestamp, \
             installed_by text, \
             execution_time int, \
             success boolean, \
             PRIMARY KEY (installed_rank))",
            self.ledger_table()
        );
        execute_statement(self.session, &ledger, self.timeout).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {}_vr_idx ON {} (version_rank)",
            self.table,
            self.ledger_table()
        );
        execute_statement(self.session, &index, self.timeout).await?;

        let counts = format!(
            "CREATE TABLE IF NOT EXISTS {} (name text PRIMARY KEY, count counter)",
            self.counts_table()
        );
        execute_statement(self.session, &counts, self.timeout).await?;

        Ok(())
    }

    /// Whether the ledger table exists in the keyspace.
    pub async fn table_exists(&self) -> Result<bool> {
        let result = execute_with_values(
            self.session,
            "SELECT table_name FROM system_schema.tables \
             WHERE keyspace_name = ? AND table_name = ?",
            (self.keyspace.as_str(), self.table.as_str()),
            self.timeout,
        )
        .await?;
        Ok(!result.rows.unwrap_or_default().is_empty())
    }

    /// Increment the rank counter and return the new value.
    pub async fn allocate_installed_rank(&self) -> Result<i32> {
        let update = format!(
            "UPDATE {} SET count = count + 1 WHERE name = ?",
            self.counts_table()
        );
        execute_with_values(self.session, &update, (RANK_COUNTER_NAME,), self.timeout).await?;

        let select = format!("SELECT count FROM {} WHERE name = ?", self.counts_table());
        let result =
            execute_with_values(self.session, &select, (RANK_COUNTER_NAME,), self.timeout).await?;

        let mut rows = result.rows_typed::<(Counter,)>()?;
        match rows.next() {
            Some(row) => {
                let (Counter(count),) = row?;
                Ok(count as i32)
            }
            None => Err(SextantError::StoreFailure {
                cause: "rank counter row missing after increment".to_string(),
            }),
        }
    }

    /// Read every ledger row except the lock row, sorted by version ascending
    /// (ties broken by insertion order).
    pub async fn find_applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let select = format!(
            "SELECT version_rank, installed_rank, version, description, type, script, \
             checksum, installed_on, installed_by, execution_time, success FROM {}",
            self.ledger_table()
        );
        let result = execute_statement(self.session, &select, self.timeout).await?;

        let mut migrations = Vec::new();
        for row in result.rows_typed::<LedgerRow>()? {
            let (
                version_rank,
                installed_rank,
                version,
                description,
                migration_type,
                script,
                checksum,
                installed_on,
                installed_by,
                execution_time,
                success,
            ) = row?;

            let installed_rank = installed_rank.ok_or_else(|| SextantError::StoreFailure {
                cause: "ledger row without installed_rank".to_string(),
            })?;
            if installed_rank == LOCK_RANK {
                continue;
            }

            let raw_version = version.ok_or_else(|| SextantError::StoreFailure {
                cause: format!("ledger row {} has no version", installed_rank),
            })?;
            let version = MigrationVersion::parse(&raw_version)?;

            let raw_type = migration_type.ok_or_else(|| SextantError::StoreFailure {
                cause: format!("ledger row {} has no type", installed_rank),
            })?;
            let migration_type: MigrationType = raw_type.parse()?;

            let installed_on = installed_on
                .and_then(|ts| Utc.timestamp_millis_opt(ts.0).single())
                .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());

            migrations.push(AppliedMigration {
                version_rank: version_rank.unwrap_or(0),
                installed_rank,
                version,
                description: description.unwrap_or_default(),
                migration_type,
                script: script.unwrap_or_default(),
                checksum,
                installed_on,
                installed_by: installed_by.unwrap_or_default(),
                execution_time_ms: execution_time.unwrap_or(0),
                success: success.unwrap_or(false),
            });
        }

        migrations.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then(a.installed_rank.cmp(&b.installed_rank))
        });
        Ok(migrations)
    }

    /// Whether any ledger row exists at the given version.
    pub async fn has_applied_migration(&self, version: &MigrationVersion) -> Result<bool> {
        let applied = self.find_applied_migrations().await?;
        Ok(applied.iter().any(|a| &a.version == version))
    }

    /// Insert a ledger row. The ledger is insert-once per version: a second
    /// insert at an existing version fails with `DuplicateVersion`, which is
    /// how a losing concurrent migrator aborts cleanly.
    ///
    /// `version_rank` is written as null here; it is recomputed over all
    /// successful rows once the migration succeeds.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_applied_migration(
        &self,
        installed_rank: i32,
        version: &MigrationVersion,
        description: &str,
        migration_type: MigrationType,
        script: &str,
        checksum: Option<i32>,
        installed_by: &str,
        execution_time_ms: i32,
        success: bool,
    ) -> Result<()> {
        let applied = self.find_applied_migrations().await?;
        if let Some(existing) = applied.iter().find(|a| &a.version == version) {
            return Err(SextantError::DuplicateVersion {
                version: version.to_string(),
                first: existing.script.clone(),
                second: script.to_string(),
            });
        }

        let insert = format!(
            "INSERT INTO {} (version_rank, installed_rank, version, description, type, \
             script, checksum, installed_on, installed_by, execution_time, success) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.ledger_table()
        );
        execute_with_values(
            self.session,
            &insert,
            (
                None::<i32>,
                installed_rank,
                version.to_string(),
                description,
                migration_type.to_string(),
                script,
                checksum,
                CqlTimestamp(Utc::now().timestamp_millis()),
                installed_by,
                execution_time_ms,
                success,
            ),
            self.timeout,
        )
        .await?;

        Ok(())
    }

    /// Flip a pending row to success with its measured execution time.
    pub async fn mark_success(&self, installed_rank: i32, execution_time_ms: i32) -> Result<()> {
        let update = format!(
            "UPDATE {} SET success = true, execution_time = ? WHERE installed_rank = ?",
            self.ledger_table()
        );
        execute_with_values(
            self.session,
            &update,
            (execution_time_ms, installed_rank),
            self.timeout,
        )
        .await?;
        Ok(())
    }

    /// Recompute the dense `version_rank` assignment: `1..n` over all
    /// successful rows in ascending version order. Out-of-order applications
    /// shift the ranks of later versions, so this runs after every success.
    pub async fn update_version_ranks(&self) -> Result<()> {
        let applied = self.find_applied_migrations().await?;

        let update = format!(
            "UPDATE {} SET version_rank = ? WHERE installed_rank = ?",
            self.ledger_table()
        );
        for (installed_rank, version_rank) in compute_version_ranks(&applied) {
            execute_with_values(
                self.session,
                &update,
                (version_rank, installed_rank),
                self.timeout,
            )
            .await?;
        }
        Ok(())
    }

    /// Try once to take the advisory lock row. Returns whether we won it.
    pub async fn acquire_lock(&self, owner: &str) -> Result<bool> {
        let insert = format!(
            "INSERT INTO {} (installed_rank, version, description, installed_on, \
             installed_by, success) VALUES (?, ?, ?, ?, ?, false) IF NOT EXISTS",
            self.ledger_table()
        );
        let result = execute_with_values(
            self.session,
            &insert,
            (
                LOCK_RANK,
                LOCK_VERSION,
                LOCK_DESCRIPTION,
                CqlTimestamp(Utc::now().timestamp_millis()),
                owner,
            ),
            self.timeout,
        )
        .await?;

        // A conditional write reports its outcome in the [applied] column.
        let won = result
            .rows
            .as_ref()
            .and_then(|rows| rows.first())
            .and_then(|row| row.columns.first())
            .and_then(|col| col.as_ref())
            .and_then(|value| match value {
                CqlValue::Boolean(applied) => Some(*applied),
                _ => None,
            })
            .unwrap_or(false);

        Ok(won)
    }

    /// Take the advisory lock, polling with exponential backoff and jitter.
    ///
    /// The lock is advisory under eventual consistency; the insert-once
    /// ledger remains the real fence against concurrent migrators.
    pub async fn acquire_lock_with_retry(&self, owner: &str) -> Result<()> {
        for attempt in 0..LOCK_MAX_ATTEMPTS {
            if self.acquire_lock(owner).await? {
                tracing::debug!(table = %self.ledger_table(), "Acquired migration lock");
                return Ok(());
            }

            let base_ms = std::cmp::min(100u64 << attempt, 3000);
            let delay = Duration::from_millis(base_ms + fastrand::u64(0..100));
            tracing::info!(
                table = %self.ledger_table(),
                attempt = attempt + 1,
                max_attempts = LOCK_MAX_ATTEMPTS,
                delay_ms = delay.as_millis() as u64,
                "Migration lock is held, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        Err(SextantError::LockUnavailable {
            attempts: LOCK_MAX_ATTEMPTS,
        })
    }

    /// Delete the lock row.
    pub async fn release_lock(&self) -> Result<()> {
        let delete = format!(
            "DELETE FROM {} WHERE installed_rank = ?",
            self.ledger_table()
        );
        execute_with_values(self.session, &delete, (LOCK_RANK,), self.timeout).await?;
        Ok(())
    }
}

/// Dense rank assignment for successful rows, ascending by version.
/// Returns `(installed_rank, version_rank)` pairs for rows whose stored rank
/// needs to change.
pub(crate) fn compute_version_ranks(applied: &[AppliedMigration]) -> Vec<(i32, i32)> {
    let mut successful: Vec<&AppliedMigration> = applied.iter().filter(|a| a.success).collect();
    successful.sort_by(|a, b| {
        a.version
            .cmp(&b.version)
            .then(a.installed_rank.cmp(&b.installed_rank))
    });

    successful
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let rank = (i + 1) as i32;
            (row.version_rank != rank).then_some((row.installed_rank, rank))
        })
        .collect()
}
