use anyhow::Context;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use log::info;
use tokio_postgres::NoTls;

use crate::config::PostgresSettings;

/// Split SQL into statements, respecting dollar-quoted strings.
/// This handles PostgreSQL function definitions that use $$ ... $$ blocks.
///
/// Scans bytes: `$` and `;` are ASCII and never occur inside a multi-byte
/// UTF-8 sequence, so every split offset is a char boundary.
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut in_dollar_quote = false;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Check for dollar-quote start/end ($$)
        if i + 1 < bytes.len() && bytes[i] == b'$' && bytes[i + 1] == b'$' {
            in_dollar_quote = !in_dollar_quote;
            i += 2;
            continue;
        }

        // Only treat semicolon as statement separator when not inside dollar-quote
        if bytes[i] == b';' && !in_dollar_quote {
            let stmt = &sql[start..i];
            if !stmt.trim().is_empty() {
                statements.push(stmt);
            }
            start = i + 1;
        }
        i += 1;
    }

    // Handle last statement (if no trailing semicolon)
    if start < sql.len() {
        let stmt = &sql[start..];
        if !stmt.trim().is_empty() {
            statements.push(stmt);
        }
    }

    statements
}

/// PostgreSQL client with connection pooling.
///
/// Serves the raw provider document store (read side) and the cron
/// checkpoints. Uses `deadpool-postgres` for connection management.
#[derive(Clone)]
pub struct PostgresClient {
    pub pool: Pool,
}

impl PostgresClient {
    pub async fn new(settings: PostgresSettings) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL");

        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .password(&settings.password)
            .dbname(&settings.database);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(settings.pool_size)
            .build()
            .context("Failed to create PostgreSQL connection pool")?;

        // Test connection with retry logic
        let mut retries = 0;
        let max_retries = 3;

        loop {
            match pool.get().await {
                Ok(_conn) => {
                    info!("Successfully connected to PostgreSQL");
                    return Ok(Self {
                        pool,
                    });
                },
                Err(e) => {
                    retries += 1;

                    if retries >= max_retries {
                        return Err(anyhow::anyhow!(
                            "Failed to connect to PostgreSQL after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }

                    let delay = std::time::Duration::from_millis(100 * 2_u64.pow(retries));
                    log::warn!(
                        "Failed to connect to PostgreSQL (attempt {}/{}), retrying in {:?}...",
                        retries,
                        max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        info!("Running PostgreSQL migrations");
        let client = self.pool.get().await?;

        let schema = tokio::fs::read_to_string("schema/postgres.sql")
            .await
            .context("Failed to read schema/postgres.sql")?;

        // Split SQL statements properly, respecting dollar-quoted strings (e.g., function bodies)
        for stmt in split_sql_statements(&schema) {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            client
                .execute(stmt, &[])
                .await
                .with_context(|| format!("Failed to execute migration statement: {}", stmt))?;
        }

        info!("PostgreSQL migrations completed successfully");
        Ok(())
    }
}
