//! Migration resolution: filename parsing, resolved-migration types, and the
//! resolvers that discover CQL scripts and host-registered code units.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex_lite::Regex;
use scylla::Session;

use crate::checksum::calculate_checksum;
use crate::cql_parser::split_statements;
use crate::db;
use crate::error::{Result, SextantError};
use crate::scanner::scan_location;
use crate::version::MigrationVersion;

/// File name grammar: `V<version>__<description>.cql`.
static CQL_FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^V([0-9.]+)__(.+)$").unwrap());

const CQL_SUFFIX: &str = ".cql";
const MAX_DESCRIPTION_LEN: usize = 1000;

/// What kind of migration a ledger row or resolved unit represents.
///
/// The wire strings round-trip with ledgers written by the JVM tooling this
/// engine is compatible with, so they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationType {
    /// A parsed CQL script.
    Cql,
    /// A code unit executed by the host application.
    JavaDriver,
    /// Internal marker row inserted when the ledger is first created.
    Schema,
    /// Marker row inserted by the baseline command.
    Baseline,
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationType::Cql => write!(f, "CQL"),
            MigrationType::JavaDriver => write!(f, "JAVA_DRIVER"),
            MigrationType::Schema => write!(f, "SCHEMA"),
            MigrationType::Baseline => write!(f, "BASELINE"),
        }
    }
}

impl FromStr for MigrationType {
    type Err = SextantError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CQL" => Ok(MigrationType::Cql),
            "JAVA_DRIVER" => Ok(MigrationType::JavaDriver),
            "SCHEMA" => Ok(MigrationType::Schema),
            "BASELINE" => Ok(MigrationType::Baseline),
            other => Err(SextantError::StoreFailure {
                cause: format!("unknown migration type '{}' in ledger", other),
            }),
        }
    }
}

/// Executable body of a resolved migration.
///
/// Commands are values: a migration carries one of these instead of being a
/// subclass of anything.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Apply the migration over a live session. Each blocking step must
    /// respect the per-statement timeout.
    async fn execute(&self, session: &Session, timeout: Duration) -> Result<()>;
}

/// A migration unit discovered by a resolver, ready to apply.
#[derive(Clone)]
pub struct ResolvedMigration {
    pub version: MigrationVersion,
    pub description: String,
    pub migration_type: MigrationType,
    /// Logical name used in error messages and the ledger's `script` column.
    pub script: String,
    /// `None` only for code units without the checksum capability.
    pub checksum: Option<i32>,
    pub physical_location: String,
    pub executor: Arc<dyn MigrationExecutor>,
}

impl fmt::Debug for ResolvedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMigration")
            .field("version", &self.version.to_string())
            .field("description", &self.description)
            .field("migration_type", &self.migration_type)
            .field("script", &self.script)
            .field("checksum", &self.checksum)
            .field("physical_location", &self.physical_location)
            .finish()
    }
}

/// A code unit that migrates the keyspace through the driver directly.
///
/// Host applications implement this and register the unit with the engine;
/// the resolver turns each one into a `JAVA_DRIVER` entry in the plan.
#[async_trait]
pub trait CodeMigration: Send + Sync {
    /// Version this unit migrates the keyspace to.
    fn version(&self) -> &str;

    /// Description recorded in the ledger.
    fn description(&self) -> &str;

    /// Stable content digest, when the unit can provide one.
    fn checksum(&self) -> Option<i32> {
        None
    }

    /// Apply the migration over a live session.
    async fn migrate(
        &self,
        session: &Session,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Parse a CQL migration file name into `(version, description)`.
///
/// Returns `Ok(None)` for files that do not follow the
/// `V<version>__<description>.cql` grammar; those are silently ignored.
/// Files that follow the grammar but carry an unparseable version fail the
/// resolve.
pub fn parse_migration_filename(filename: &str) -> Result<Option<(MigrationVersion, String)>> {
    let Some(stem) = filename.strip_suffix(CQL_SUFFIX) else {
        return Ok(None);
    };
    let Some(caps) = CQL_FILENAME_RE.captures(stem) else {
        return Ok(None);
    };

    let raw_version = caps.get(1).unwrap().as_str();
    let description = caps.get(2).unwrap().as_str().replace('_', " ");

    let version =
        MigrationVersion::parse(raw_version).map_err(|e| SextantError::InvalidMigrationName {
            name: filename.to_string(),
            reason: e.to_string(),
        })?;

    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(SextantError::InvalidMigrationName {
            name: filename.to_string(),
            reason: format!("description exceeds {} characters", MAX_DESCRIPTION_LEN),
        });
    }

    Ok(Some((version, description)))
}

/// Runs a parsed CQL script statement by statement.
struct CqlScriptExecutor {
    statements: Vec<String>,
}

#[async_trait]
impl MigrationExecutor for CqlScriptExecutor {
    async fn execute(&self, session: &Session, timeout: Duration) -> Result<()> {
        for statement in &self.statements {
            tracing::debug!("Executing: {}", statement);
            db::execute_statement(session, statement, timeout).await?;
        }
        Ok(())
    }
}

/// Delegates execution to a registered code unit.
struct CodeUnitExecutor {
    unit: Arc<dyn CodeMigration>,
    version: String,
}

#[async_trait]
impl MigrationExecutor for CodeUnitExecutor {
    async fn execute(&self, session: &Session, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.unit.migrate(session)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SextantError::MigrationFailed {
                version: self.version.clone(),
                cause: e.to_string(),
            }),
            Err(_) => Err(SextantError::StatementTimeout {
                statement: format!("code migration {}", self.version),
                timeout_secs: timeout.as_secs(),
            }),
        }
    }
}

/// Discovers migration units and turns them into an ordered plan.
pub trait MigrationResolver: Send + Sync {
    /// Resolve all migrations, sorted ascending by version.
    fn resolve(&self) -> Result<Vec<ResolvedMigration>>;
}

/// Resolves `V<version>__<description>.cql` scripts under the configured
/// location roots.
pub struct CqlResolver {
    locations: Vec<PathBuf>,
    encoding: String,
}

impl CqlResolver {
    pub fn new(locations: Vec<PathBuf>, encoding: String) -> Self {
        Self {
            locations,
            encoding,
        }
    }
}

impl MigrationResolver for CqlResolver {
    fn resolve(&self) -> Result<Vec<ResolvedMigration>> {
        let mut migrations = Vec::new();

        for location in &self.locations {
            for resource in scan_location(location, CQL_SUFFIX)? {
                let filename = resource.filename();
                let Some((version, description)) = parse_migration_filename(&filename)? else {
                    tracing::debug!("Skipping non-migration file: {}", resource.logical_path());
                    continue;
                };

                let content = resource.load_as_string(&self.encoding)?;
                let checksum = calculate_checksum(&content);
                // Parse eagerly so a malformed script aborts the command
                // before anything touches the ledger.
                let statements = split_statements(&content)?;

                migrations.push(ResolvedMigration {
                    version,
                    description,
                    migration_type: MigrationType::Cql,
                    script: filename,
                    checksum: Some(checksum),
                    physical_location: resource.physical_location(),
                    executor: Arc::new(CqlScriptExecutor { statements }),
                });
            }
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }
}

/// Resolves code units registered by the host application.
#[derive(Default)]
pub struct CodeResolver {
    units: Vec<Arc<dyn CodeMigration>>,
}

impl CodeResolver {
    pub fn new(units: Vec<Arc<dyn CodeMigration>>) -> Self {
        Self { units }
    }
}

impl MigrationResolver for CodeResolver {
    fn resolve(&self) -> Result<Vec<ResolvedMigration>> {
        let mut migrations = Vec::new();

        for unit in &self.units {
            let raw_version = unit.version().to_string();
            let version = MigrationVersion::parse(&raw_version)?;
            let description = unit.description().to_string();
            let script = format!("V{}__{}", raw_version, description.replace(' ', "_"));

            if description.is_empty() || description.len() > MAX_DESCRIPTION_LEN {
                return Err(SextantError::InvalidMigrationName {
                    name: script,
                    reason: format!(
                        "description must be 1..={} characters",
                        MAX_DESCRIPTION_LEN
                    ),
                });
            }

            migrations.push(ResolvedMigration {
                version,
                description,
                migration_type: MigrationType::JavaDriver,
                script: script.clone(),
                checksum: unit.checksum(),
                physical_location: script,
                executor: Arc::new(CodeUnitExecutor {
                    unit: Arc::clone(unit),
                    version: raw_version,
                }),
            });
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(migrations)
    }
}

/// Concatenates the outputs of several resolvers, enforcing version
/// uniqueness across all of them.
pub struct CompositeResolver {
    resolvers: Vec<Box<dyn MigrationResolver>>,
}

impl CompositeResolver {
    pub fn new(resolvers: Vec<Box<dyn MigrationResolver>>) -> Self {
        Self { resolvers }
    }
}

impl MigrationResolver for CompositeResolver {
    fn resolve(&self) -> Result<Vec<ResolvedMigration>> {
        let mut migrations = Vec::new();
        for resolver in &self.resolvers {
            migrations.extend(resolver.resolve()?);
        }

        migrations.sort_by(|a, b| a.version.cmp(&b.version));

        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(SextantError::DuplicateVersion {
                    version: pair[0].version.to_string(),
                    first: pair[0].script.clone(),
                    second: pair[1].script.clone(),
                });
            }
        }

        Ok(migrations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versioned_filename() {
        let (version, desc) = parse_migration_filename("V1__Create_users.cql")
            .unwrap()
            .unwrap();
        assert_eq!(version, MigrationVersion::parse("1").unwrap());
        assert_eq!(desc, "Create users");
    }

    #[test]
    fn test_parse_dotted_version() {
        let (version, desc) = parse_migration_filename("V1.2.3__Add_column.cql")
            .unwrap()
            .unwrap();
        assert_eq!(version, MigrationVersion::parse("1.2.3").unwrap());
        assert_eq!(desc, "Add column");
    }

    #[test]
    fn test_non_matching_files_ignored() {
        assert!(parse_migration_filename("README.md").unwrap().is_none());
        assert!(parse_migration_filename("create_tables.cql").unwrap().is_none());
        assert!(parse_migration_filename("V1_single_sep.cql").unwrap().is_none());
        assert!(parse_migration_filename("V1__no_suffix").unwrap().is_none());
        assert!(parse_migration_filename("Vabc__desc.cql").unwrap().is_none());
    }

    #[test]
    fn test_matching_but_bad_version_fails() {
        let err = parse_migration_filename("V1..2__desc.cql").unwrap_err();
        assert!(matches!(err, SextantError::InvalidMigrationName { .. }));
    }

    #[test]
    fn test_migration_type_round_trip() {
        for t in [
            MigrationType::Cql,
            MigrationType::JavaDriver,
            MigrationType::Schema,
            MigrationType::Baseline,
        ] {
            assert_eq!(t.to_string().parse::<MigrationType>().unwrap(), t);
        }
        assert!("WHATEVER".parse::<MigrationType>().is_err());
    }

    #[test]
    fn test_cql_resolver_scans_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V2__second.cql"), "SELECT 2;").unwrap();
        std::fs::write(dir.path().join("V1__first.cql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip me").unwrap();

        let resolver = CqlResolver::new(vec![dir.path().to_path_buf()], "UTF-8".to_string());
        let migrations = resolver.resolve().unwrap();

        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].script, "V1__first.cql");
        assert_eq!(migrations[1].script, "V2__second.cql");
        assert_eq!(migrations[0].migration_type, MigrationType::Cql);
        assert!(migrations[0].checksum.is_some());
    }

    #[test]
    fn test_cql_resolver_rejects_malformed_script() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__bad.cql"), "SELECT 'unterminated").unwrap();

        let resolver = CqlResolver::new(vec![dir.path().to_path_buf()], "UTF-8".to_string());
        let err = resolver.resolve().unwrap_err();
        assert!(matches!(err, SextantError::UnterminatedLiteral { .. }));
    }

    struct TestUnit {
        version: &'static str,
        checksum: Option<i32>,
    }

    #[async_trait]
    impl CodeMigration for TestUnit {
        fn version(&self) -> &str {
            self.version
        }

        fn description(&self) -> &str {
            "seed reference data"
        }

        fn checksum(&self) -> Option<i32> {
            self.checksum
        }

        async fn migrate(
            &self,
            _session: &Session,
        ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Ok(())
        }
    }

    #[test]
    fn test_code_resolver() {
        let resolver = CodeResolver::new(vec![
            Arc::new(TestUnit {
                version: "3",
                checksum: Some(77),
            }),
            Arc::new(TestUnit {
                version: "2.1",
                checksum: None,
            }),
        ]);

        let migrations = resolver.resolve().unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].version.to_string(), "2.1");
        assert_eq!(migrations[0].checksum, None);
        assert_eq!(migrations[1].checksum, Some(77));
        assert_eq!(migrations[0].migration_type, MigrationType::JavaDriver);
        assert_eq!(migrations[1].script, "V3__seed_reference_data");
    }

    #[test]
    fn test_composite_rejects_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__a.cql"), "SELECT 1;").unwrap();
        std::fs::write(dir.path().join("V1.0__b.cql"), "SELECT 1;").unwrap();

        let composite = CompositeResolver::new(vec![Box::new(CqlResolver::new(
            vec![dir.path().to_path_buf()],
            "UTF-8".to_string(),
        ))]);

        let err = composite.resolve().unwrap_err();
        match err {
            SextantError::DuplicateVersion { version, .. } => assert_eq!(version, "1"),
            other => panic!("expected DuplicateVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_composite_merges_resolvers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("V1__schema.cql"), "SELECT 1;").unwrap();

        let composite = CompositeResolver::new(vec![
            Box::new(CqlResolver::new(
                vec![dir.path().to_path_buf()],
                "UTF-8".to_string(),
            )),
            Box::new(CodeResolver::new(vec![Arc::new(TestUnit {
                version: "2",
                checksum: None,
            })])),
        ]);

        let migrations = composite.resolve().unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[0].migration_type, MigrationType::Cql);
        assert_eq!(migrations[1].migration_type, MigrationType::JavaDriver);
    }
}
