use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SextantError};
use crate::ledger::DEFAULT_TABLE_BASENAME;
use crate::scanner::is_utf8;
use crate::version::MigrationVersion;

/// Top-level configuration for Sextant.
///
/// Assembled by the caller (TOML file, environment, CLI overrides) and
/// consumed immutably by the engine.
#[derive(Debug, Clone)]
pub struct SextantConfig {
    pub cluster: ClusterConfig,
    pub migrations: MigrationSettings,
}

/// Cluster connection configuration.
#[derive(Clone)]
pub struct ClusterConfig {
    pub contact_points: Vec<String>,
    pub port: u16,
    pub keyspace: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_retries: u32,
    pub connect_timeout_secs: u32,
}

impl ClusterConfig {
    /// Contact points as `host:port` node addresses.
    pub fn nodes(&self) -> Vec<String> {
        self.contact_points
            .iter()
            .map(|cp| {
                if cp.contains(':') {
                    cp.clone()
                } else {
                    format!("{}:{}", cp, self.port)
                }
            })
            .collect()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            contact_points: vec!["127.0.0.1".to_string()],
            port: 9042,
            keyspace: String::new(),
            username: None,
            password: None,
            connect_retries: 0,
            connect_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("contact_points", &self.contact_points)
            .field("port", &self.port)
            .field("keyspace", &self.keyspace)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("connect_retries", &self.connect_retries)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Migration behavior settings.
#[derive(Debug, Clone)]
pub struct MigrationSettings {
    pub locations: Vec<PathBuf>,
    pub table_prefix: String,
    pub target: MigrationVersion,
    pub baseline_version: MigrationVersion,
    pub baseline_description: String,
    pub encoding: String,
    pub timeout_secs: u64,
    pub allow_out_of_order: bool,
    pub installed_by: Option<String>,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            locations: vec![PathBuf::from("db/migration")],
            table_prefix: String::new(),
            target: MigrationVersion::Latest,
            baseline_version: MigrationVersion::Version(vec![1]),
            baseline_description: "<< Cassandra Baseline >>".to_string(),
            encoding: "UTF-8".to_string(),
            timeout_secs: 60,
            allow_out_of_order: false,
            installed_by: None,
        }
    }
}

impl Default for SextantConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            migrations: MigrationSettings::default(),
        }
    }
}

// ── TOML deserialization structs ──

#[derive(Deserialize, Default)]
struct TomlConfig {
    cluster: Option<TomlClusterConfig>,
    migrations: Option<TomlMigrationSettings>,
}

#[derive(Deserialize, Default)]
struct TomlClusterConfig {
    contact_points: Option<Vec<String>>,
    port: Option<u16>,
    keyspace: Option<String>,
    username: Option<String>,
    password: Option<String>,
    connect_retries: Option<u32>,
    connect_timeout: Option<u32>,
}

#[derive(Deserialize, Default)]
struct TomlMigrationSettings {
    locations: Option<Vec<String>>,
    table_prefix: Option<String>,
    target: Option<String>,
    baseline_version: Option<String>,
    baseline_description: Option<String>,
    encoding: Option<String>,
    timeout: Option<u64>,
    allow_out_of_order: Option<bool>,
    installed_by: Option<String>,
}

/// CLI overrides that take highest priority.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub contact_points: Option<Vec<String>>,
    pub port: Option<u16>,
    pub keyspace: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_retries: Option<u32>,
    pub connect_timeout: Option<u32>,
    pub locations: Option<Vec<PathBuf>>,
    pub table_prefix: Option<String>,
    pub target: Option<String>,
    pub baseline_version: Option<String>,
    pub timeout: Option<u64>,
    pub allow_out_of_order: Option<bool>,
    pub installed_by: Option<String>,
}

impl SextantConfig {
    /// Load configuration with the following priority (highest wins):
    /// 1. CLI arguments
    /// 2. Environment variables (`SEXTANT_*`)
    /// 3. TOML config file
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>, overrides: &CliOverrides) -> Result<Self> {
        let mut config = SextantConfig::default();

        let toml_path = config_path.unwrap_or("sextant.toml");
        if let Ok(content) = std::fs::read_to_string(toml_path) {
            let toml_config: TomlConfig = toml::from_str(&content).map_err(|e| {
                SextantError::ConfigurationError {
                    field: "config".to_string(),
                    reason: format!("failed to parse '{}': {}", toml_path, e),
                }
            })?;
            config.apply_toml(toml_config)?;
        } else if config_path.is_some() {
            // An explicitly named config file must exist.
            return Err(SextantError::ConfigurationError {
                field: "config".to_string(),
                reason: format!("config file '{}' not found", toml_path),
            });
        }

        config.apply_env()?;
        config.apply_cli(overrides)?;
        config.validate()?;

        Ok(config)
    }

    /// The fully composed ledger table name.
    pub fn table_name(&self) -> String {
        format!("{}{}", self.migrations.table_prefix, DEFAULT_TABLE_BASENAME)
    }

    /// The per-statement timeout.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.migrations.timeout_secs)
    }

    /// Identity recorded in the ledger's `installed_by` column.
    pub fn installed_by(&self) -> String {
        self.migrations
            .installed_by
            .clone()
            .or_else(|| self.cluster.username.clone())
            .unwrap_or_else(|| "sextant".to_string())
    }

    fn apply_toml(&mut self, toml: TomlConfig) -> Result<()> {
        if let Some(c) = toml.cluster {
            if let Some(v) = c.contact_points {
                self.cluster.contact_points = v;
            }
            if let Some(v) = c.port {
                self.cluster.port = v;
            }
            if let Some(v) = c.keyspace {
                self.cluster.keyspace = v;
            }
            if let Some(v) = c.username {
                self.cluster.username = Some(v);
            }
            if let Some(v) = c.password {
                self.cluster.password = Some(v);
            }
            if let Some(v) = c.connect_retries {
                self.cluster.connect_retries = v;
            }
            if let Some(v) = c.connect_timeout {
                self.cluster.connect_timeout_secs = v;
            }
        }

        if let Some(m) = toml.migrations {
            if let Some(v) = m.locations {
                self.migrations.locations = normalize_locations(&v)?;
            }
            if let Some(v) = m.table_prefix {
                self.migrations.table_prefix = v;
            }
            if let Some(v) = m.target {
                self.migrations.target = parse_target(&v)?;
            }
            if let Some(v) = m.baseline_version {
                self.migrations.baseline_version = MigrationVersion::parse(&v)?;
            }
            if let Some(v) = m.baseline_description {
                self.migrations.baseline_description = v;
            }
            if let Some(v) = m.encoding {
                self.migrations.encoding = v;
            }
            if let Some(v) = m.timeout {
                self.migrations.timeout_secs = v;
            }
            if let Some(v) = m.allow_out_of_order {
                self.migrations.allow_out_of_order = v;
            }
            if let Some(v) = m.installed_by {
                self.migrations.installed_by = Some(v);
            }
        }

        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("SEXTANT_CONTACT_POINTS") {
            self.cluster.contact_points = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("SEXTANT_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.cluster.port = port;
            }
        }
        if let Ok(v) = std::env::var("SEXTANT_KEYSPACE") {
            self.cluster.keyspace = v;
        }
        if let Ok(v) = std::env::var("SEXTANT_USERNAME") {
            self.cluster.username = Some(v);
        }
        if let Ok(v) = std::env::var("SEXTANT_PASSWORD") {
            self.cluster.password = Some(v);
        }
        if let Ok(v) = std::env::var("SEXTANT_CONNECT_RETRIES") {
            if let Ok(n) = v.parse::<u32>() {
                self.cluster.connect_retries = n;
            }
        }
        if let Ok(v) = std::env::var("SEXTANT_CONNECT_TIMEOUT") {
            if let Ok(n) = v.parse::<u32>() {
                self.cluster.connect_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SEXTANT_LOCATIONS") {
            let parts: Vec<String> = v.split(',').map(|s| s.trim().to_string()).collect();
            self.migrations.locations = normalize_locations(&parts)?;
        }
        if let Ok(v) = std::env::var("SEXTANT_TABLE_PREFIX") {
            self.migrations.table_prefix = v;
        }
        if let Ok(v) = std::env::var("SEXTANT_TARGET") {
            self.migrations.target = parse_target(&v)?;
        }
        if let Ok(v) = std::env::var("SEXTANT_BASELINE_VERSION") {
            self.migrations.baseline_version = MigrationVersion::parse(&v)?;
        }
        if let Ok(v) = std::env::var("SEXTANT_BASELINE_DESCRIPTION") {
            self.migrations.baseline_description = v;
        }
        if let Ok(v) = std::env::var("SEXTANT_ENCODING") {
            self.migrations.encoding = v;
        }
        if let Ok(v) = std::env::var("SEXTANT_TIMEOUT") {
            if let Ok(n) = v.parse::<u64>() {
                self.migrations.timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("SEXTANT_ALLOW_OUT_OF_ORDER") {
            self.migrations.allow_out_of_order = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("SEXTANT_INSTALLED_BY") {
            self.migrations.installed_by = Some(v);
        }
        Ok(())
    }

    fn apply_cli(&mut self, overrides: &CliOverrides) -> Result<()> {
        if let Some(ref v) = overrides.contact_points {
            self.cluster.contact_points = v.clone();
        }
        if let Some(v) = overrides.port {
            self.cluster.port = v;
        }
        if let Some(ref v) = overrides.keyspace {
            self.cluster.keyspace = v.clone();
        }
        if let Some(ref v) = overrides.username {
            self.cluster.username = Some(v.clone());
        }
        if let Some(ref v) = overrides.password {
            self.cluster.password = Some(v.clone());
        }
        if let Some(v) = overrides.connect_retries {
            self.cluster.connect_retries = v;
        }
        if let Some(v) = overrides.connect_timeout {
            self.cluster.connect_timeout_secs = v;
        }
        if let Some(ref v) = overrides.locations {
            self.migrations.locations = v.clone();
        }
        if let Some(ref v) = overrides.table_prefix {
            self.migrations.table_prefix = v.clone();
        }
        if let Some(ref v) = overrides.target {
            self.migrations.target = parse_target(v)?;
        }
        if let Some(ref v) = overrides.baseline_version {
            self.migrations.baseline_version = MigrationVersion::parse(v)?;
        }
        if let Some(v) = overrides.timeout {
            self.migrations.timeout_secs = v;
        }
        if let Some(v) = overrides.allow_out_of_order {
            self.migrations.allow_out_of_order = v;
        }
        if let Some(ref v) = overrides.installed_by {
            self.migrations.installed_by = Some(v.clone());
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        crate::db::validate_identifier("keyspace", &self.cluster.keyspace)?;
        if !self.migrations.table_prefix.is_empty() {
            crate::db::validate_identifier("table_prefix", &self.migrations.table_prefix)?;
        }
        if !is_utf8(&self.migrations.encoding) {
            return Err(SextantError::ConfigurationError {
                field: "encoding".to_string(),
                reason: format!(
                    "unsupported encoding '{}', only UTF-8 is supported",
                    self.migrations.encoding
                ),
            });
        }
        if self.cluster.connect_retries > 20 {
            self.cluster.connect_retries = 20;
            tracing::warn!("connect_retries capped at 20");
        }
        Ok(())
    }
}

/// Parse a target version string; `latest` and `empty` select the sentinels.
pub fn parse_target(raw: &str) -> Result<MigrationVersion> {
    match raw.to_lowercase().as_str() {
        "latest" => Ok(MigrationVersion::Latest),
        "empty" => Ok(MigrationVersion::Empty),
        _ => MigrationVersion::parse(raw),
    }
}

/// Normalize a location string to a path.
///
/// A `filesystem:` prefix is stripped; `classpath:` locations belong to the
/// JVM tooling and are rejected.
pub fn normalize_location(location: &str) -> Result<PathBuf> {
    if location.starts_with("classpath:") {
        return Err(SextantError::ConfigurationError {
            field: "locations".to_string(),
            reason: format!("classpath locations are not supported: '{}'", location),
        });
    }
    let stripped = location.strip_prefix("filesystem:").unwrap_or(location);
    Ok(PathBuf::from(stripped))
}

fn normalize_locations(locations: &[String]) -> Result<Vec<PathBuf>> {
    locations.iter().map(|l| normalize_location(l)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SextantConfig::default();
        assert_eq!(config.migrations.locations, vec![PathBuf::from("db/migration")]);
        assert_eq!(config.migrations.target, MigrationVersion::Latest);
        assert_eq!(
            config.migrations.baseline_version,
            MigrationVersion::parse("1").unwrap()
        );
        assert_eq!(config.migrations.baseline_description, "<< Cassandra Baseline >>");
        assert_eq!(config.migrations.encoding, "UTF-8");
        assert_eq!(config.migrations.timeout_secs, 60);
        assert!(!config.migrations.allow_out_of_order);
        assert_eq!(config.table_name(), "cassandra_migration_version");
        assert_eq!(config.cluster.port, 9042);
    }

    #[test]
    fn test_table_prefix_composes_table_name() {
        let mut config = SextantConfig::default();
        config.migrations.table_prefix = "myapp_".to_string();
        assert_eq!(config.table_name(), "myapp_cassandra_migration_version");
    }

    #[test]
    fn test_nodes_append_default_port() {
        let mut cluster = ClusterConfig::default();
        cluster.contact_points = vec!["10.0.0.1".to_string(), "10.0.0.2:9043".to_string()];
        assert_eq!(cluster.nodes(), vec!["10.0.0.1:9042", "10.0.0.2:9043"]);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
[cluster]
contact_points = ["cass1.internal", "cass2.internal"]
keyspace = "orders"
username = "migrator"
password = "secret"

[migrations]
locations = ["cql/migrations", "filesystem:cql/seeds"]
table_prefix = "orders_"
target = "4.2"
allow_out_of_order = true
timeout = 120
"#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let mut config = SextantConfig::default();
        config.apply_toml(toml_config).unwrap();

        assert_eq!(
            config.cluster.contact_points,
            vec!["cass1.internal", "cass2.internal"]
        );
        assert_eq!(config.cluster.keyspace, "orders");
        assert_eq!(config.cluster.username.as_deref(), Some("migrator"));
        assert_eq!(
            config.migrations.locations,
            vec![PathBuf::from("cql/migrations"), PathBuf::from("cql/seeds")]
        );
        assert_eq!(config.migrations.table_prefix, "orders_");
        assert_eq!(
            config.migrations.target,
            MigrationVersion::parse("4.2").unwrap()
        );
        assert!(config.migrations.allow_out_of_order);
        assert_eq!(config.migrations.timeout_secs, 120);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = SextantConfig::default();
        let overrides = CliOverrides {
            keyspace: Some("inventory".to_string()),
            target: Some("7".to_string()),
            allow_out_of_order: Some(true),
            locations: Some(vec![PathBuf::from("custom/path")]),
            table_prefix: Some("inv_".to_string()),
            ..Default::default()
        };

        config.apply_cli(&overrides).unwrap();

        assert_eq!(config.cluster.keyspace, "inventory");
        assert_eq!(config.migrations.target, MigrationVersion::parse("7").unwrap());
        assert!(config.migrations.allow_out_of_order);
        assert_eq!(config.migrations.locations, vec![PathBuf::from("custom/path")]);
        assert_eq!(config.table_name(), "inv_cassandra_migration_version");
    }

    #[test]
    fn test_validate_requires_keyspace() {
        let mut config = SextantConfig::default();
        assert!(config.validate().is_err());

        config.cluster.keyspace = "good_ks".to_string();
        assert!(config.validate().is_ok());

        config.cluster.keyspace = "bad;ks".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsupported_encoding() {
        let mut config = SextantConfig::default();
        config.cluster.keyspace = "ks".to_string();
        config.migrations.encoding = "ISO-8859-1".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("latest").unwrap(), MigrationVersion::Latest);
        assert_eq!(parse_target("LATEST").unwrap(), MigrationVersion::Latest);
        assert_eq!(parse_target("empty").unwrap(), MigrationVersion::Empty);
        assert_eq!(
            parse_target("3.1").unwrap(),
            MigrationVersion::parse("3.1").unwrap()
        );
        assert!(parse_target("not-a-version").is_err());
    }

    #[test]
    fn test_normalize_location() {
        assert_eq!(
            normalize_location("filesystem:/cql/migration").unwrap(),
            PathBuf::from("/cql/migration")
        );
        assert_eq!(
            normalize_location("db/migration").unwrap(),
            PathBuf::from("db/migration")
        );
        assert!(normalize_location("classpath:db/migration").is_err());
    }

    #[test]
    fn test_installed_by_fallbacks() {
        let mut config = SextantConfig::default();
        assert_eq!(config.installed_by(), "sextant");

        config.cluster.username = Some("migrator".to_string());
        assert_eq!(config.installed_by(), "migrator");

        config.migrations.installed_by = Some("deploy-bot".to_string());
        assert_eq!(config.installed_by(), "deploy-bot");
    }
}
