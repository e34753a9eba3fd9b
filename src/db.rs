use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::config::DatabaseConfig;
use crate::error::SourceError;
use crate::models::{Recipient, RecipientDirectory, SourceRow};
use crate::source::FeedbackSource;
use crate::window::ReportWindow;

/// The feedback warehouse: a flattened `submissions` view plus the `coaches` dimension.
pub struct PgSource {
    pool: PgPool,
    schema: String,
}

impl PgSource {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, SourceError> {
        if !is_identifier(&config.schema) {
            return Err(SourceError::Connection(format!(
                "invalid schema name: {}",
                config.schema
            )));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.url)
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl FeedbackSource for PgSource {
    async fn fetch_directory(&self) -> Result<RecipientDirectory, SourceError> {
        let query = directory_query(&self.schema);
        let records = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut recipients = Vec::with_capacity(records.len());
        for row in records {
            let name: String = row.try_get("coach_name")?;
            let email: Option<String> = row.try_get("coach_email")?;
            recipients.push(Recipient {
                name: name.trim().to_string(),
                email: email.unwrap_or_default().trim().to_string(),
            });
        }

        Ok(RecipientDirectory::new(recipients))
    }

    async fn fetch_rows(&self, window: &ReportWindow) -> Result<Vec<SourceRow>, SourceError> {
        let query = rows_query(&self.schema);
        let rows = sqlx::query_as::<_, SourceRow>(&query)
            .bind(window.start_utc())
            .bind(window.end_utc())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}

fn directory_query(schema: &str) -> String {
    format!(
        "SELECT coach_name, coach_email \
         FROM {schema}.coaches \
         WHERE coach_name IS NOT NULL"
    )
}

fn rows_query(schema: &str) -> String {
    format!(
        "SELECT submission_id, created_at, coach_name, customer_name, member_name, \
         rating_raw, comments, consent_raw \
         FROM {schema}.submissions \
         WHERE created_at >= $1 AND created_at < $2 \
         AND consent_raw ILIKE 'yes%' \
         ORDER BY created_at DESC"
    )
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
