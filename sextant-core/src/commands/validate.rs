//! Validate applied migrations against the locally resolved set.
//!
//! Validation reports the first discrepancy in version-ascending order and
//! returns it rather than throwing, so callers can inspect or escalate.

use std::collections::BTreeMap;

use scylla::Session;

use crate::config::SextantConfig;
use crate::error::Result;
use crate::ledger::{AppliedMigration, SchemaVersionDao};
use crate::migration::{MigrationResolver, MigrationType, ResolvedMigration};
use crate::version::MigrationVersion;

/// Produce the first validation error, or `None` when the ledger and the
/// resolved set agree.
///
/// With `pending_or_future` set, migrations that are merely not applied yet
/// are tolerated — unless they sit below the current ledger maximum and
/// out-of-order application is disabled. That mode is what Migrate runs
/// before applying anything.
pub(crate) fn first_validation_error(
    resolved: &[ResolvedMigration],
    applied: &[AppliedMigration],
    target: &MigrationVersion,
    pending_or_future: bool,
    allow_out_of_order: bool,
) -> Option<String> {
    let mut merged: BTreeMap<MigrationVersion, (Option<&ResolvedMigration>, Option<&AppliedMigration>)> =
        BTreeMap::new();
    for m in resolved {
        merged.entry(m.version.clone()).or_insert((None, None)).0 = Some(m);
    }
    for a in applied {
        merged.entry(a.version.clone()).or_insert((None, None)).1 = Some(a);
    }

    let highest_success = applied
        .iter()
        .filter(|a| a.success)
        .map(|a| &a.version)
        .max()
        .cloned();

    let baseline_version = applied
        .iter()
        .find(|a| a.migration_type == MigrationType::Baseline)
        .map(|a| a.version.clone());

    for (version, (res, app)) in &merged {
        let is_marker = app.is_some_and(|a| {
            matches!(
                a.migration_type,
                MigrationType::Schema | MigrationType::Baseline
            )
        });

        // Applied with nothing to compare against locally.
        if app.is_some() && res.is_none() && !is_marker {
            return Some(format!(
                "Detected applied migration not resolved locally: {}",
                version
            ));
        }

        // Resolved but never applied.
        if res.is_some() {
            let below_baseline = baseline_version
                .as_ref()
                .is_some_and(|baseline| version <= baseline);
            if app.is_none() && !below_baseline && version <= target {
                let out_of_order = highest_success
                    .as_ref()
                    .is_some_and(|highest| version < highest);
                if !pending_or_future || (out_of_order && !allow_out_of_order) {
                    return Some(format!(
                        "Detected resolved migration not applied: {}",
                        version
                    ));
                }
            }
        }

        // Both sides present: the identity tuple must agree.
        if let (Some(m), Some(a)) = (res, app) {
            if is_marker {
                continue;
            }
            if let (Some(applied_sum), Some(resolved_sum)) = (a.checksum, m.checksum) {
                if applied_sum != resolved_sum {
                    return Some(format!(
                        "Migration checksum mismatch for version {}: applied={}, resolved={}",
                        version, applied_sum, resolved_sum
                    ));
                }
            }
            if a.description != m.description {
                return Some(format!(
                    "Migration description mismatch for version {}: applied={}, resolved={}",
                    version, a.description, m.description
                ));
            }
            if a.migration_type != m.migration_type {
                return Some(format!(
                    "Migration type mismatch for version {}: applied={}, resolved={}",
                    version, a.migration_type, m.migration_type
                ));
            }
        }
    }

    None
}

/// Execute the validate command. `Ok(None)` means the ledger checks out.
pub async fn execute(
    session: &Session,
    config: &SextantConfig,
    resolver: &dyn MigrationResolver,
) -> Result<Option<String>> {
    let resolved = resolver.resolve()?;

    let dao = SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        config.statement_timeout(),
    );

    if !dao.table_exists().await? {
        // Nothing applied yet; only strictly-unapplied errors can fire.
        return Ok(first_validation_error(
            &resolved,
            &[],
            &config.migrations.target,
            false,
            config.migrations.allow_out_of_order,
        ));
    }

    dao.acquire_lock_with_retry(&config.installed_by()).await?;
    let applied = dao.find_applied_migrations().await;
    if let Err(e) = dao.release_lock().await {
        tracing::warn!(error = %e, "Failed to release migration lock");
    }
    let applied = applied?;

    let result = first_validation_error(
        &resolved,
        &applied,
        &config.migrations.target,
        false,
        config.migrations.allow_out_of_order,
    );

    match &result {
        None => tracing::info!(resolved = resolved.len(), "Validation completed"),
        Some(detail) => tracing::error!(detail = %detail, "Validation failed"),
    }

    Ok(result)
}
