//! Create the ledger tables and seed the schema-creation marker.

use scylla::Session;

use crate::config::SextantConfig;
use crate::error::Result;
use crate::ledger::SchemaVersionDao;
use crate::migration::MigrationType;
use crate::version::MigrationVersion;

/// Execute the initialize command. Idempotent; returns whether the marker
/// row was inserted on this run.
pub async fn execute(session: &Session, config: &SextantConfig) -> Result<bool> {
    let dao = SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        config.statement_timeout(),
    );

    dao.create_tables_if_missing().await?;

    let applied = dao.find_applied_migrations().await?;
    if !applied.is_empty() {
        tracing::debug!(
            table = %config.table_name(),
            rows = applied.len(),
            "Ledger already initialized"
        );
        return Ok(false);
    }

    let installed_rank = dao.allocate_installed_rank().await?;
    dao.add_applied_migration(
        installed_rank,
        &MigrationVersion::Version(vec![0]),
        "<< Schema Creation >>",
        MigrationType::Schema,
        &config.cluster.keyspace,
        None,
        &config.installed_by(),
        0,
        true,
    )
    .await?;
    dao.update_version_ranks().await?;

    tracing::info!(
        table = %config.table_name(),
        keyspace = %config.cluster.keyspace,
        "Initialized migration ledger"
    );
    Ok(true)
}
