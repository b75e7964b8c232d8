use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use sextant_core::{MigrateReport, MigrationInfo, MigrationState};

/// Format migration info as a colored table.
pub fn print_info_table(infos: &[MigrationInfo]) {
    if infos.is_empty() {
        println!("{}", "No migrations found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Version"),
            Cell::new("Description"),
            Cell::new("Type"),
            Cell::new("State"),
            Cell::new("Installed On"),
            Cell::new("Execution Time"),
        ]);

    for info in infos {
        let installed_on = info
            .installed_on
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let exec_time = info
            .execution_time_ms
            .map(|t| format!("{}ms", t))
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(info.version.to_string()),
            Cell::new(&info.description),
            Cell::new(&info.migration_type),
            Cell::new(format_state(&info.state)),
            Cell::new(&installed_on),
            Cell::new(&exec_time),
        ]);
    }

    println!("{table}");
}

fn format_state(state: &MigrationState) -> String {
    match state {
        MigrationState::Pending => "Pending".yellow().to_string(),
        MigrationState::AboveTarget => "Above Target".dimmed().to_string(),
        MigrationState::Success => "Success".green().to_string(),
        MigrationState::OutOfOrder => "Out of Order".yellow().to_string(),
        MigrationState::Ignored => "Ignored".dimmed().to_string(),
        MigrationState::Failed => "Failed".red().bold().to_string(),
        MigrationState::MissingSuccess => "Missing (applied)".red().to_string(),
        MigrationState::MissingFailed => "Missing (failed)".red().to_string(),
        MigrationState::Baseline => "Baseline".blue().to_string(),
    }
}

/// Print a migration report summary.
pub fn print_migrate_summary(report: &MigrateReport) {
    if report.migrations_applied == 0 {
        println!("{}", "Keyspace is up to date. No migration necessary.".green());
        return;
    }

    println!(
        "{}",
        format!(
            "Successfully applied {} migration(s) (execution time {}ms)",
            report.migrations_applied, report.total_time_ms
        )
        .green()
        .bold()
    );

    for detail in &report.details {
        println!(
            "  {} {} — {} ({}ms)",
            "→".green(),
            detail.version,
            detail.description,
            detail.execution_time_ms
        );
    }
}

/// Print a validate result.
pub fn print_validate_result(error: Option<&str>) {
    match error {
        None => println!(
            "{}",
            "Successfully validated all applied migrations.".green().bold()
        ),
        Some(detail) => println!("{} {}", "ERROR:".red().bold(), detail),
    }
}
