//! Lightweight schema migration library for Cassandra-compatible clusters.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use sextant_core::config::{CliOverrides, SextantConfig};
//! use sextant_core::Sextant;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SextantConfig::load(None, &CliOverrides::default())?;
//! let sx = Sextant::new(config).await?;
//! let report = sx.migrate(None).await?;
//! println!("Applied {} migrations", report.migrations_applied);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`config`] — Configuration loading (TOML, env vars, CLI overrides)
//! - [`version`] — Migration version ordering with `Empty`/`Latest` sentinels
//! - [`scanner`] — Resource discovery under migration locations
//! - [`migration`] — Filename parsing and the CQL/code-unit resolvers
//! - [`cql_parser`] — Statement splitting for CQL scripts
//! - [`checksum`] — CRC32 content digests
//! - [`db`] — Cluster sessions and timeout-wrapped execution
//! - [`ledger`] — The schema-version ledger and its advisory lock
//! - [`commands`] — initialize, baseline, migrate, validate, info
//! - [`error`] — Error types

pub mod checksum;
pub mod commands;
pub mod config;
pub mod cql_parser;
pub mod db;
pub mod error;
pub mod ledger;
pub mod migration;
pub mod scanner;
pub mod version;

use std::sync::Arc;

use scylla::Session;

use config::SextantConfig;
use error::Result;
use migration::{CodeMigration, CodeResolver, CompositeResolver, CqlResolver};

pub use commands::info::{MigrationInfo, MigrationState};
pub use commands::migrate::{MigrateDetail, MigrateReport};
pub use config::CliOverrides;
pub use error::SextantError;
pub use version::MigrationVersion;

/// Main entry point for the Sextant library.
///
/// Create a `Sextant` instance with a config and use its methods to run
/// migration commands programmatically.
pub struct Sextant {
    pub config: SextantConfig,
    session: Arc<Session>,
    code_migrations: Vec<Arc<dyn CodeMigration>>,
}

impl Sextant {
    /// Create a new instance, connecting to the cluster.
    ///
    /// The session is owned by the engine and released when the instance is
    /// dropped. If `connect_retries` is configured, connection attempts back
    /// off exponentially.
    pub async fn new(config: SextantConfig) -> Result<Self> {
        let session = db::connect(&config.cluster).await?;
        Ok(Self {
            config,
            session: Arc::new(session),
            code_migrations: Vec::new(),
        })
    }

    /// Create an instance over an externally owned session.
    ///
    /// The engine shares the session and never closes it; the caller's `Arc`
    /// keeps it alive.
    pub fn with_session(config: SextantConfig, session: Arc<Session>) -> Self {
        Self {
            config,
            session,
            code_migrations: Vec::new(),
        }
    }

    /// Register a code-unit migration to be resolved alongside CQL scripts.
    pub fn register_code_migration(&mut self, unit: Arc<dyn CodeMigration>) {
        self.code_migrations.push(unit);
    }

    fn resolver(&self) -> CompositeResolver {
        CompositeResolver::new(vec![
            Box::new(CqlResolver::new(
                self.config.migrations.locations.clone(),
                self.config.migrations.encoding.clone(),
            )),
            Box::new(CodeResolver::new(self.code_migrations.clone())),
        ])
    }

    /// Create the ledger tables and seed the schema marker. Idempotent.
    pub async fn initialize(&self) -> Result<bool> {
        commands::initialize::execute(&self.session, &self.config).await
    }

    /// Apply pending migrations up to the target version.
    pub async fn migrate(&self, target: Option<&str>) -> Result<MigrateReport> {
        let mut config = self.config.clone();
        if let Some(raw) = target {
            config.migrations.target = config::parse_target(raw)?;
        }
        commands::migrate::execute(&self.session, &config, &self.resolver()).await
    }

    /// Show the merged migration status view.
    pub async fn info(&self) -> Result<Vec<MigrationInfo>> {
        commands::info::execute(&self.session, &self.config, &self.resolver()).await
    }

    /// Validate applied migrations against the locally resolved set.
    /// Returns `None` when everything agrees, else the first discrepancy.
    pub async fn validate(&self) -> Result<Option<String>> {
        commands::validate::execute(&self.session, &self.config, &self.resolver()).await
    }

    /// Baseline an existing keyspace. Returns the baselined version.
    pub async fn baseline(
        &self,
        version: Option<&str>,
        description: Option<&str>,
    ) -> Result<MigrationVersion> {
        commands::baseline::execute(&self.session, &self.config, version, description).await
    }
}
