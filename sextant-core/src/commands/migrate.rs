//! Apply pending migrations in ascending version order.

use std::time::Instant;

use scylla::Session;
use serde::Serialize;

use crate::config::SextantConfig;
use crate::error::{Result, SextantError};
use crate::ledger::SchemaVersionDao;
use crate::migration::{MigrationResolver, ResolvedMigration};

use super::info::{self, MigrationState};
use super::validate;

/// Report returned after a migrate operation.
#[derive(Debug, Serialize)]
pub struct MigrateReport {
    pub migrations_applied: usize,
    pub total_time_ms: i32,
    pub details: Vec<MigrateDetail>,
}

#[derive(Debug, Serialize)]
pub struct MigrateDetail {
    pub version: String,
    pub description: String,
    pub script: String,
    pub execution_time_ms: i32,
}

/// Execute the migrate command.
pub async fn execute(
    session: &Session,
    config: &SextantConfig,
    resolver: &dyn MigrationResolver,
) -> Result<MigrateReport> {
    // Resolution and script parsing happen before anything touches the ledger.
    let resolved = resolver.resolve()?;

    let dao = SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        config.statement_timeout(),
    );

    dao.create_tables_if_missing().await?;
    dao.acquire_lock_with_retry(&config.installed_by()).await?;

    let result = run_migrate(session, config, &dao, &resolved).await;

    if let Err(e) = dao.release_lock().await {
        tracing::warn!(error = %e, "Failed to release migration lock");
    }

    match &result {
        Ok(report) => tracing::info!(
            migrations_applied = report.migrations_applied,
            total_time_ms = report.total_time_ms,
            "Migrate completed"
        ),
        Err(e) => tracing::error!(error = %e, "Migrate failed"),
    }

    result
}

async fn run_migrate(
    session: &Session,
    config: &SextantConfig,
    dao: &SchemaVersionDao<'_>,
    resolved: &[ResolvedMigration],
) -> Result<MigrateReport> {
    let target = &config.migrations.target;
    let applied = dao.find_applied_migrations().await?;
    let infos = info::build_info(
        resolved,
        &applied,
        target,
        config.migrations.allow_out_of_order,
    );

    // A failed row blocks everything until an operator removes it or marks
    // it successful; re-running must not silently skip past it.
    if let Some(failed) = infos.iter().find(|i| {
        matches!(
            i.state,
            MigrationState::Failed | MigrationState::MissingFailed
        ) && i.version <= *target
    }) {
        return Err(SextantError::MigrationFailed {
            version: failed.version.to_string(),
            cause: format!(
                "a previous attempt of {} failed; delete the ledger row or mark it successful before retrying",
                failed.script
            ),
        });
    }

    if let Some(detail) = validate::first_validation_error(
        resolved,
        &applied,
        target,
        true,
        config.migrations.allow_out_of_order,
    ) {
        return Err(SextantError::ValidationFailed { detail });
    }

    let mut report = MigrateReport {
        migrations_applied: 0,
        total_time_ms: 0,
        details: Vec::new(),
    };

    for pending in info::pending(&infos) {
        let Some(migration) = resolved.iter().find(|m| m.version == pending.version) else {
            continue;
        };

        let execution_time_ms = apply_migration(session, config, dao, migration).await?;

        report.migrations_applied += 1;
        report.total_time_ms += execution_time_ms;
        report.details.push(MigrateDetail {
            version: migration.version.to_string(),
            description: migration.description.clone(),
            script: migration.script.clone(),
            execution_time_ms,
        });
    }

    Ok(report)
}

async fn apply_migration(
    session: &Session,
    config: &SextantConfig,
    dao: &SchemaVersionDao<'_>,
    migration: &ResolvedMigration,
) -> Result<i32> {
    tracing::info!(
        migration = %migration.script,
        version = %migration.version,
        "Applying migration"
    );

    let installed_rank = dao.allocate_installed_rank().await?;
    dao.add_applied_migration(
        installed_rank,
        &migration.version,
        &migration.description,
        migration.migration_type,
        &migration.script,
        migration.checksum,
        &config.installed_by(),
        0,
        false,
    )
    .await?;

    let start = Instant::now();
    match migration
        .executor
        .execute(session, config.statement_timeout())
        .await
    {
        Ok(()) => {
            let execution_time_ms = start.elapsed().as_millis() as i32;
            dao.mark_success(installed_rank, execution_time_ms).await?;
            dao.update_version_ranks().await?;
            Ok(execution_time_ms)
        }
        Err(e) => {
            // The success=false row stays behind for the operator.
            tracing::error!(script = %migration.script, error = %e, "Migration failed");
            match e {
                timeout @ SextantError::StatementTimeout { .. } => Err(timeout),
                failed @ SextantError::MigrationFailed { .. } => Err(failed),
                other => Err(SextantError::MigrationFailed {
                    version: migration.version.to_string(),
                    cause: other.to_string(),
                }),
            }
        }
    }
}
