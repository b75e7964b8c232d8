mod output;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use sextant_core::config::{normalize_location, CliOverrides, SextantConfig};
use sextant_core::{MigrationState, Sextant, SextantError};

#[derive(Parser)]
#[command(
    name = "sextant",
    about = "Lightweight CQL migration tool for Cassandra-compatible clusters",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Cluster contact points, comma-separated (overrides config)
    #[arg(long, value_name = "HOSTS")]
    contact_points: Option<String>,

    /// Cluster port (overrides config)
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,

    /// Target keyspace (overrides config)
    #[arg(long, value_name = "KEYSPACE")]
    keyspace: Option<String>,

    /// Cluster username (overrides config)
    #[arg(long, value_name = "USER")]
    username: Option<String>,

    /// Cluster password (overrides config; prefer SEXTANT_PASSWORD)
    #[arg(long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Number of retries when connecting to the cluster
    #[arg(long, value_name = "N")]
    connect_retries: Option<u32>,

    /// Connection timeout in seconds (default: 30)
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u32>,

    /// Migration locations, comma-separated (overrides config)
    #[arg(long, value_name = "PATHS")]
    locations: Option<String>,

    /// Prefix for the ledger table name (overrides config)
    #[arg(long, value_name = "PREFIX")]
    table_prefix: Option<String>,

    /// Per-statement timeout in seconds (default: 60)
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Allow applying migrations below the current ledger maximum
    #[arg(long, overrides_with = "no_out_of_order")]
    out_of_order: bool,

    /// Disallow out-of-order migrations (overrides --out-of-order)
    #[arg(long = "no-out-of-order", hide = true)]
    no_out_of_order: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Preview what would be done without making changes
    #[arg(long)]
    dry_run: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration ledger tables in the keyspace
    Init,

    /// Apply pending migrations
    Migrate {
        /// Migrate up to this version only (or "latest"/"empty")
        #[arg(long, value_name = "VERSION")]
        target: Option<String>,
    },

    /// Show migration status
    Info,

    /// Validate applied migrations against local files
    Validate,

    /// Baseline an existing keyspace
    Baseline {
        /// Version to baseline at
        #[arg(long, value_name = "VER")]
        baseline_version: Option<String>,

        /// Description for the baseline entry
        #[arg(long, value_name = "DESC")]
        baseline_description: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Suppress log noise when emitting JSON.
    let filter = if cli.json || cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .without_time()
        .init();

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Exit codes: 0 success, 1 validation failure, 2 migration failure,
/// 3 configuration or IO error.
fn exit_code(error: &SextantError) -> i32 {
    match error {
        SextantError::ValidationFailed { .. } => 1,
        SextantError::MigrationFailed { .. }
        | SextantError::StoreFailure { .. }
        | SextantError::StatementTimeout { .. }
        | SextantError::LockUnavailable { .. }
        | SextantError::BaselineNotAllowed { .. } => 2,
        _ => 3,
    }
}

async fn run(cli: Cli) -> Result<(), SextantError> {
    let json_output = cli.json;
    let dry_run = cli.dry_run;

    let out_of_order = if cli.out_of_order {
        Some(true)
    } else if cli.no_out_of_order {
        Some(false)
    } else {
        None
    };

    let locations = match &cli.locations {
        Some(raw) => Some(
            raw.split(',')
                .map(|s| normalize_location(s.trim()))
                .collect::<Result<Vec<PathBuf>, _>>()?,
        ),
        None => None,
    };

    let overrides = CliOverrides {
        contact_points: cli
            .contact_points
            .as_ref()
            .map(|cp| cp.split(',').map(|s| s.trim().to_string()).collect()),
        port: cli.port,
        keyspace: cli.keyspace.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
        connect_retries: cli.connect_retries,
        connect_timeout: cli.connect_timeout,
        locations,
        table_prefix: cli.table_prefix.clone(),
        target: match &cli.command {
            Commands::Migrate { target } => target.clone(),
            _ => None,
        },
        baseline_version: match &cli.command {
            Commands::Baseline {
                baseline_version, ..
            } => baseline_version.clone(),
            _ => None,
        },
        timeout: cli.timeout,
        allow_out_of_order: out_of_order,
        installed_by: None,
    };

    let config = SextantConfig::load(cli.config.as_deref(), &overrides)?;
    let sx = Sextant::new(config).await?;

    // Dry-run mode: show what would be applied using the info view.
    if dry_run {
        if let Commands::Migrate { .. } = &cli.command {
            let infos = sx.info().await?;
            let pending: Vec<_> = infos
                .into_iter()
                .filter(|i| i.state == MigrationState::Pending)
                .collect();

            if json_output {
                println!("{}", serde_json::to_string_pretty(&pending).unwrap());
            } else if pending.is_empty() {
                println!("{}", "Dry run: No pending migrations.".green());
            } else {
                println!(
                    "{}",
                    format!("Dry run: {} migration(s) would be applied:", pending.len())
                        .yellow()
                        .bold()
                );
                for info in &pending {
                    println!(
                        "  {} {} — {} [{}]",
                        "→".yellow(),
                        info.version,
                        info.description,
                        info.script
                    );
                }
            }
            return Ok(());
        }
    }

    match cli.command {
        Commands::Init => {
            let created = sx.initialize().await?;
            if json_output {
                println!("{}", serde_json::json!({ "initialized": created }));
            } else if created {
                println!("{}", "Migration ledger initialized.".green().bold());
            } else {
                println!("{}", "Migration ledger already initialized.".green());
            }
        }
        Commands::Migrate { target } => {
            let report = sx.migrate(target.as_deref()).await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&report).unwrap());
            } else {
                output::print_migrate_summary(&report);
            }
        }
        Commands::Info => {
            let infos = sx.info().await?;
            if json_output {
                println!("{}", serde_json::to_string_pretty(&infos).unwrap());
            } else {
                output::print_info_table(&infos);
            }
        }
        Commands::Validate => {
            let result = sx.validate().await?;
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({ "valid": result.is_none(), "error": result })
                );
            } else {
                output::print_validate_result(result.as_deref());
            }
            if result.is_some() {
                process::exit(1);
            }
        }
        Commands::Baseline {
            baseline_version,
            baseline_description,
        } => {
            let version = sx
                .baseline(baseline_version.as_deref(), baseline_description.as_deref())
                .await?;
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({ "success": true, "version": version.to_string() })
                );
            } else {
                println!(
                    "{}",
                    format!("Successfully baselined keyspace at version {}.", version)
                        .green()
                        .bold()
                );
            }
        }
    }

    Ok(())
}

fn print_error(error: &SextantError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    match error {
        SextantError::ConfigurationError { .. } => {
            eprintln!(
                "{}",
                "Hint: Check your sextant.toml or set SEXTANT_KEYSPACE / SEXTANT_CONTACT_POINTS."
                    .dimmed()
            );
        }
        SextantError::StoreFailure { .. } => {
            eprintln!(
                "{}",
                "Hint: Verify the cluster is reachable and credentials are correct.".dimmed()
            );
        }
        SextantError::MigrationFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: The failed ledger row blocks further runs; remove it or mark it successful once the cause is fixed."
                    .dimmed()
            );
        }
        SextantError::ValidationFailed { .. } => {
            eprintln!(
                "{}",
                "Hint: A migration changed after it was applied, or the ledger and local files diverged."
                    .dimmed()
            );
        }
        SextantError::LockUnavailable { .. } => {
            eprintln!(
                "{}",
                "Hint: Another migrator may be running; if one crashed, delete the lock row (installed_rank = 0)."
                    .dimmed()
            );
        }
        _ => {}
    }
}
