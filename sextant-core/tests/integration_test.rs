//! Integration tests for sextant-core.
//!
//! Requires a running Cassandra-compatible cluster. Set the
//! SEXTANT_TEST_CONTACT_POINT env var, e.g.:
//!   SEXTANT_TEST_CONTACT_POINT="127.0.0.1:9042"
//!
//! Tests are skipped when the variable is unset.
//! Run with: cargo test --test integration_test

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scylla::{Session, SessionBuilder};

use sextant_core::config::SextantConfig;
use sextant_core::ledger::SchemaVersionDao;
use sextant_core::migration::MigrationType;
use sextant_core::{MigrationState, Sextant, SextantError};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn contact_point() -> Option<String> {
    std::env::var("SEXTANT_TEST_CONTACT_POINT").ok()
}

macro_rules! require_cluster {
    () => {
        match contact_point() {
            Some(cp) => cp,
            None => {
                eprintln!("SEXTANT_TEST_CONTACT_POINT not set, skipping");
                return;
            }
        }
    };
}

/// Connect and create a fresh keyspace to isolate the test run.
async fn setup_keyspace(contact_point: &str, prefix: &str) -> (Arc<Session>, String) {
    let session = SessionBuilder::new()
        .known_node(contact_point)
        .build()
        .await
        .expect("failed to connect to test cluster");

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let keyspace = format!("sextant_test_{}_{}_{}", prefix, std::process::id(), id);

    session
        .query(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                keyspace
            ),
            &[],
        )
        .await
        .expect("failed to create test keyspace");
    session
        .use_keyspace(&keyspace, false)
        .await
        .expect("failed to switch keyspace");

    (Arc::new(session), keyspace)
}

async fn teardown_keyspace(session: &Session, keyspace: &str) {
    let _ = session
        .query(format!("DROP KEYSPACE IF EXISTS {}", keyspace), &[])
        .await;
}

fn test_config(keyspace: &str, migrations_dir: &Path) -> SextantConfig {
    let mut config = SextantConfig::default();
    config.cluster.keyspace = keyspace.to_string();
    config.migrations.locations = vec![migrations_dir.to_path_buf()];
    config
}

fn dao<'a>(session: &'a Session, config: &SextantConfig) -> SchemaVersionDao<'a> {
    SchemaVersionDao::new(
        session,
        &config.cluster.keyspace,
        &config.table_name(),
        Duration::from_secs(60),
    )
}

// ─── Tests ───

#[tokio::test]
async fn test_fresh_apply_and_idempotent_rerun() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "fresh").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("V1__init.cql"),
        "CREATE TABLE t (id int PRIMARY KEY);",
    )
    .unwrap();
    std::fs::write(dir.path().join("V2__add_col.cql"), "ALTER TABLE t ADD v text;").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config.clone(), Arc::clone(&session));

    let report = sx.migrate(None).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 2);
    assert_eq!(report.details[0].version, "1");
    assert_eq!(report.details[1].version, "2");

    // Second run is a no-op over the same ledger.
    let report2 = sx.migrate(None).await.expect("second migrate failed");
    assert_eq!(report2.migrations_applied, 0);

    // After a successful migrate, validation passes.
    assert_eq!(sx.validate().await.expect("validate failed"), None);

    let infos = sx.info().await.expect("info failed");
    assert!(infos.iter().all(|i| i.state == MigrationState::Success));

    // installed_rank is strictly increasing, version_rank dense.
    let applied = dao(&session, &config).find_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].installed_rank < applied[1].installed_rank);
    assert_eq!(applied[0].version_rank, 1);
    assert_eq!(applied[1].version_rank, 2);
    assert!(applied.iter().all(|a| a.success));
    assert!(applied
        .iter()
        .all(|a| a.migration_type == MigrationType::Cql));

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_target_limits_migration() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "target").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V1__one.cql"), "CREATE TABLE t1 (id int PRIMARY KEY);").unwrap();
    std::fs::write(dir.path().join("V2__two.cql"), "CREATE TABLE t2 (id int PRIMARY KEY);").unwrap();
    std::fs::write(dir.path().join("V3__three.cql"), "CREATE TABLE t3 (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config, Arc::clone(&session));

    let report = sx.migrate(Some("2")).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 2);
    assert_eq!(report.details.last().unwrap().version, "2");

    // An "empty" target applies nothing.
    let report = sx.migrate(Some("empty")).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 0);

    // The default target applies the rest.
    let report = sx.migrate(None).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 1);
    assert_eq!(report.details[0].version, "3");

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_validate_detects_checksum_drift() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "drift").await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("V1__init.cql");
    std::fs::write(&file, "CREATE TABLE t (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config, Arc::clone(&session));
    sx.migrate(None).await.expect("migrate failed");

    // Edit the script after it was applied.
    std::fs::write(&file, "CREATE TABLE t (id int PRIMARY KEY, extra text);").unwrap();

    let error = sx.validate().await.expect("validate errored").unwrap();
    assert!(
        error.starts_with("Migration checksum mismatch for version 1"),
        "unexpected validation message: {}",
        error
    );

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_baseline_refuses_when_higher_version_applied() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "bl_refuse").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V5__five.cql"), "CREATE TABLE t5 (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config, Arc::clone(&session));
    sx.migrate(None).await.expect("migrate failed");

    let err = sx.baseline(Some("3"), None).await.unwrap_err();
    assert!(matches!(err, SextantError::BaselineNotAllowed { .. }));

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_baseline_skips_older_migrations() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "bl_skip").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V1__old.cql"), "CREATE TABLE old_t (id int PRIMARY KEY);").unwrap();
    std::fs::write(dir.path().join("V2__also_old.cql"), "CREATE TABLE old_t2 (id int PRIMARY KEY);").unwrap();
    std::fs::write(dir.path().join("V3__new.cql"), "CREATE TABLE new_t (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config, Arc::clone(&session));

    let version = sx.baseline(Some("2"), None).await.expect("baseline failed");
    assert_eq!(version.to_string(), "2");

    // A second baseline is refused.
    let err = sx.baseline(Some("2"), None).await.unwrap_err();
    assert!(matches!(err, SextantError::BaselineNotAllowed { .. }));

    // Migrate applies only what is above the baseline.
    let report = sx.migrate(None).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 1);
    assert_eq!(report.details[0].version, "3");

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_failure_halts_progress_and_rerun_repeats_error() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "halt").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V1__good.cql"), "CREATE TABLE g1 (id int PRIMARY KEY);").unwrap();
    std::fs::write(dir.path().join("V2__bad.cql"), "THIS IS NOT VALID CQL;").unwrap();
    std::fs::write(dir.path().join("V3__never.cql"), "CREATE TABLE g3 (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config.clone(), Arc::clone(&session));

    let err = sx.migrate(None).await.unwrap_err();
    match &err {
        SextantError::MigrationFailed { version, .. } => assert_eq!(version, "2"),
        other => panic!("expected MigrationFailed, got {:?}", other),
    }

    let applied = dao(&session, &config).find_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 2);
    assert!(applied[0].success); // V1
    assert!(!applied[1].success); // V2 left pending for the operator
    assert!(applied.iter().all(|a| a.version.to_string() != "3"));

    // Re-running without edits raises the same error.
    let err = sx.migrate(None).await.unwrap_err();
    match &err {
        SextantError::MigrationFailed { version, .. } => assert_eq!(version, "2"),
        other => panic!("expected MigrationFailed, got {:?}", other),
    }

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_out_of_order_rejected_then_allowed() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "ooo").await;

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("V2__second.cql"), "CREATE TABLE o2 (id int PRIMARY KEY);").unwrap();

    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config.clone(), Arc::clone(&session));
    sx.migrate(None).await.expect("migrate V2 failed");

    // V1 shows up late.
    std::fs::write(dir.path().join("V1__late.cql"), "CREATE TABLE o1 (id int PRIMARY KEY);").unwrap();

    let err = sx.migrate(None).await.unwrap_err();
    assert!(matches!(err, SextantError::ValidationFailed { .. }));

    let mut relaxed = config.clone();
    relaxed.migrations.allow_out_of_order = true;
    let sx = Sextant::with_session(relaxed, Arc::clone(&session));
    let report = sx.migrate(None).await.expect("out-of-order migrate failed");
    assert_eq!(report.migrations_applied, 1);
    assert_eq!(report.details[0].version, "1");

    // Ranks settle into version order even though V1 landed last.
    let applied = dao(&session, &config).find_applied_migrations().await.unwrap();
    assert_eq!(applied[0].version.to_string(), "1");
    assert_eq!(applied[0].version_rank, 1);
    assert_eq!(applied[1].version.to_string(), "2");
    assert_eq!(applied[1].version_rank, 2);
    assert!(applied[0].installed_rank > applied[1].installed_rank);

    teardown_keyspace(&session, &keyspace).await;
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let cp = require_cluster!();
    let (session, keyspace) = setup_keyspace(&cp, "init").await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&keyspace, dir.path());
    let sx = Sextant::with_session(config.clone(), Arc::clone(&session));

    assert!(sx.initialize().await.expect("initialize failed"));
    assert!(!sx.initialize().await.expect("second initialize failed"));

    let applied = dao(&session, &config).find_applied_migrations().await.unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].version.to_string(), "0");
    assert_eq!(applied[0].migration_type, MigrationType::Schema);
    assert!(applied[0].success);

    // An empty resolved set over an initialized ledger migrates nothing and
    // validates cleanly.
    let report = sx.migrate(None).await.expect("migrate failed");
    assert_eq!(report.migrations_applied, 0);
    assert_eq!(sx.validate().await.expect("validate failed"), None);

    teardown_keyspace(&session, &keyspace).await;
}
