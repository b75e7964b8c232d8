//! Cluster session management and timeout-wrapped statement execution.

use std::time::Duration;

use scylla::serialize::row::SerializeRow;
use scylla::{QueryResult, Session, SessionBuilder};

use crate::config::ClusterConfig;
use crate::error::{Result, SextantError};

/// Validate that an identifier contains only safe characters.
///
/// Identifiers are interpolated into CQL text, so anything outside
/// `[a-zA-Z0-9_]` is rejected early.
pub fn validate_identifier(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SextantError::ConfigurationError {
            field: field.to_string(),
            reason: "identifier cannot be empty".to_string(),
        });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SextantError::ConfigurationError {
            field: field.to_string(),
            reason: format!(
                "identifier '{}' contains invalid characters, only [a-zA-Z0-9_] are allowed",
                name
            ),
        });
    }
    Ok(())
}

async fn connect_once(config: &ClusterConfig) -> Result<Session> {
    let mut builder = SessionBuilder::new()
        .known_nodes(&config.nodes())
        .connection_timeout(Duration::from_secs(u64::from(config.connect_timeout_secs)));

    if let (Some(user), Some(password)) = (&config.username, &config.password) {
        builder = builder.user(user, password);
    }

    let session = builder.build().await?;
    session.use_keyspace(&config.keyspace, false).await?;
    Ok(session)
}

/// Connect to the cluster, retrying up to `connect_retries` times with
/// exponential backoff plus jitter.
///
/// Each retry waits `min(2^attempt, 30)` seconds plus up to one second of
/// jitter before the next attempt.
pub async fn connect(config: &ClusterConfig) -> Result<Session> {
    let retries = config.connect_retries;
    let mut last_err = None;

    for attempt in 0..=retries {
        if attempt > 0 {
            let base_delay = std::cmp::min(1u64 << attempt, 30);
            let jitter_ms = fastrand::u64(0..1000);
            let delay =
                Duration::from_secs(base_delay) + Duration::from_millis(jitter_ms);
            tracing::info!(
                attempt = attempt + 1,
                max_attempts = retries + 1,
                delay_ms = delay.as_millis() as u64,
                "Connection attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }

        match connect_once(config).await {
            Ok(session) => {
                if attempt > 0 {
                    tracing::info!(
                        attempt = attempt + 1,
                        max_attempts = retries + 1,
                        "Connected successfully after retry"
                    );
                }
                return Ok(session);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap())
}

/// Run a statement with no bind values under the per-statement timeout.
pub async fn execute_statement(
    session: &Session,
    cql: &str,
    timeout: Duration,
) -> Result<QueryResult> {
    match tokio::time::timeout(timeout, session.query(cql, &[])).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SextantError::StatementTimeout {
            statement: statement_preview(cql),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Run a statement with bind values under the per-statement timeout.
pub async fn execute_with_values(
    session: &Session,
    cql: &str,
    values: impl SerializeRow,
    timeout: Duration,
) -> Result<QueryResult> {
    match tokio::time::timeout(timeout, session.query(cql, values)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SextantError::StatementTimeout {
            statement: statement_preview(cql),
            timeout_secs: timeout.as_secs(),
        }),
    }
}

/// Truncated statement text for error messages.
fn statement_preview(cql: &str) -> String {
    const MAX: usize = 120;
    if cql.chars().count() > MAX {
        let preview: String = cql.chars().take(MAX).collect();
        format!("{}...", preview)
    } else {
        cql.to_string()
    }
}
