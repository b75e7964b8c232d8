//! Baseline an existing keyspace at a specific version.
//!
//! The baseline marker declares every version at or below it as already
//! applied by other means; migrate skips them from then on.

use scylla::Session;

use crate::config::SextantConfig;
use crate::error::{Result, SextantError};
use crate::ledger::SchemaVersionDao;
use crate::migration::MigrationType;
use crate::version::MigrationVersion;

/// Execute the baseline command. Returns the version that was baselined.
pub async fn execute(
    session: &Session,
    config: &SextantConfig,
    baseline_version: Option<&str>,
    baseline_description: Option<&str>,
) -> Result<MigrationVersion> {
    let version = match baseline_version {
        Some(raw) => MigrationVersion::parse(raw)?,
        None => config.migrations.baseline_version.clone(),
    };
    let description = baseline_description.unwrap_or(&config.migrations.baseline_description);

    let dao = SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        config.statement_timeout(),
    );

    dao.create_tables_if_missing().await?;
    dao.acquire_lock_with_retry(&config.installed_by()).await?;

    let result = run_baseline(config, &dao, &version, description).await;

    if let Err(e) = dao.release_lock().await {
        tracing::warn!(error = %e, "Failed to release migration lock");
    }

    result.map(|()| version)
}

async fn run_baseline(
    config: &SextantConfig,
    dao: &SchemaVersionDao<'_>,
    version: &MigrationVersion,
    description: &str,
) -> Result<()> {
    let applied = dao.find_applied_migrations().await?;

    if let Some(marker) = applied
        .iter()
        .find(|a| a.migration_type == MigrationType::Baseline)
    {
        return Err(SextantError::BaselineNotAllowed {
            reason: format!(
                "ledger is already baselined at version {}",
                marker.version
            ),
        });
    }

    if let Some(higher) = applied.iter().filter(|a| &a.version > version).max_by(|a, b| a.version.cmp(&b.version)) {
        return Err(SextantError::BaselineNotAllowed {
            reason: format!(
                "ledger already contains version {}, which is above the requested baseline {}",
                higher.version, version
            ),
        });
    }

    let installed_rank = dao.allocate_installed_rank().await?;
    dao.add_applied_migration(
        installed_rank,
        version,
        description,
        MigrationType::Baseline,
        description,
        None,
        &config.installed_by(),
        0,
        true,
    )
    .await?;
    dao.update_version_ranks().await?;

    tracing::info!(
        version = %version,
        keyspace = %config.cluster.keyspace,
        "Successfully baselined keyspace"
    );
    Ok(())
}
