//! The migration info service: merges resolved and applied migrations into a
//! unified, version-sorted, status-annotated view. Migrate and Validate both
//! operate on this view.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scylla::Session;
use serde::Serialize;

use crate::config::SextantConfig;
use crate::error::Result;
use crate::ledger::{AppliedMigration, SchemaVersionDao};
use crate::migration::{MigrationResolver, MigrationType, ResolvedMigration};
use crate::version::MigrationVersion;

/// The state of one entry in the merged view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    /// Resolved, not yet applied, within the target.
    Pending,
    /// Resolved, not yet applied, above the target.
    AboveTarget,
    /// Applied successfully, in order.
    Success,
    /// Applied successfully, but after a higher version had already landed.
    OutOfOrder,
    /// Out of order while out-of-order application is disallowed: an
    /// unapplied migration that will never run, a row applied out of order
    /// under a looser setting, or a resolved migration below the baseline.
    Ignored,
    /// Applied and failed; blocks further migration until repaired.
    Failed,
    /// Applied successfully but no longer resolved locally.
    MissingSuccess,
    /// Applied, failed, and no longer resolved locally.
    MissingFailed,
    /// The baseline marker row.
    Baseline,
}

impl MigrationState {
    /// Whether this state counts as successfully applied.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            MigrationState::Success | MigrationState::OutOfOrder | MigrationState::Baseline
        )
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "Pending"),
            MigrationState::AboveTarget => write!(f, "Above Target"),
            MigrationState::Success => write!(f, "Success"),
            MigrationState::OutOfOrder => write!(f, "Out of Order"),
            MigrationState::Ignored => write!(f, "Ignored"),
            MigrationState::Failed => write!(f, "Failed"),
            MigrationState::MissingSuccess => write!(f, "Missing (applied)"),
            MigrationState::MissingFailed => write!(f, "Missing (failed)"),
            MigrationState::Baseline => write!(f, "Baseline"),
        }
    }
}

/// One entry of the merged resolved/applied view.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationInfo {
    pub version: MigrationVersion,
    pub description: String,
    pub migration_type: String,
    pub script: String,
    pub state: MigrationState,
    pub installed_on: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i32>,
    pub checksum: Option<i32>,
}

/// Merge resolved and applied migrations into the version-sorted view.
pub fn build_info(
    resolved: &[ResolvedMigration],
    applied: &[AppliedMigration],
    target: &MigrationVersion,
    allow_out_of_order: bool,
) -> Vec<MigrationInfo> {
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

    let mut infos = Vec::with_capacity(merged.len());
    for (version, (res, app)) in &merged {
        let state = match (res, app) {
            (_, Some(a)) => applied_state(a, res.is_some(), applied, allow_out_of_order),
            (Some(_), None) => {
                if version > target {
                    MigrationState::AboveTarget
                } else if baseline_version
                    .as_ref()
                    .is_some_and(|baseline| version < baseline)
                {
                    // Everything below the baseline is assumed applied
                    // externally.
                    MigrationState::Ignored
                } else if highest_success
                    .as_ref()
                    .is_some_and(|highest| version < highest)
                    && !allow_out_of_order
                {
                    MigrationState::Ignored
                } else {
                    MigrationState::Pending
                }
            }
            (None, None) => unreachable!("merged entry without source"),
        };

        infos.push(match app {
            Some(a) => MigrationInfo {
                version: a.version.clone(),
                description: a.description.clone(),
                migration_type: a.migration_type.to_string(),
                script: a.script.clone(),
                state,
                installed_on: Some(a.installed_on),
                execution_time_ms: Some(a.execution_time_ms),
                checksum: a.checksum,
            },
            None => {
                let m = res.expect("resolved entry");
                MigrationInfo {
                    version: m.version.clone(),
                    description: m.description.clone(),
                    migration_type: m.migration_type.to_string(),
                    script: m.script.clone(),
                    state,
                    installed_on: None,
                    execution_time_ms: None,
                    checksum: m.checksum,
                }
            }
        });
    }

    infos
}

fn applied_state(
    row: &AppliedMigration,
    resolved_locally: bool,
    applied: &[AppliedMigration],
    allow_out_of_order: bool,
) -> MigrationState {
    match row.migration_type {
        MigrationType::Baseline => MigrationState::Baseline,
        // The schema-creation marker has no on-disk counterpart by design.
        MigrationType::Schema => MigrationState::Success,
        _ if !row.success => {
            if resolved_locally {
                MigrationState::Failed
            } else {
                MigrationState::MissingFailed
            }
        }
        _ if !resolved_locally => MigrationState::MissingSuccess,
        _ => {
            // Applied out of order when a higher version landed earlier.
            let inverted = applied.iter().any(|other| {
                other.success
                    && other.version > row.version
                    && other.installed_rank < row.installed_rank
            });
            if inverted {
                if allow_out_of_order {
                    MigrationState::OutOfOrder
                } else {
                    MigrationState::Ignored
                }
            } else {
                MigrationState::Success
            }
        }
    }
}

/// The highest-version entry that counts as applied.
pub fn current(infos: &[MigrationInfo]) -> Option<&MigrationInfo> {
    infos.iter().filter(|i| i.state.is_applied()).next_back()
}

/// Entries waiting to be applied, in ascending version order.
pub fn pending(infos: &[MigrationInfo]) -> Vec<&MigrationInfo> {
    infos
        .iter()
        .filter(|i| i.state == MigrationState::Pending)
        .collect()
}

/// Execute the info command: read resolver and ledger, produce the merged view.
pub async fn execute(
    session: &Session,
    config: &SextantConfig,
    resolver: &dyn MigrationResolver,
) -> Result<Vec<MigrationInfo>> {
    let resolved = resolver.resolve()?;

    let dao = SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        config.statement_timeout(),
    );

    let applied = if dao.table_exists().await? {
        dao.find_applied_migrations().await?
    } else {
        Vec::new()
    };

    Ok(build_info(
        &resolved,
        &applied,
        &config.migrations.target,
        config.migrations.allow_out_of_order,
    ))
}
