//! pg-boss backed queue provider
//!
//! Jobs are written straight into the pg-boss `job` table. pg-boss keeps a
//! partial unique index on `(name, singletonkey)` for jobs that have not
//! completed yet, so inserting with the payload hash as `singletonkey` and
//! `ON CONFLICT DO NOTHING` gives the same once-only semantics as its
//! `sendOnce`.

use super::{QueueProvider, TileRequestPayload};
use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use osmsync_common::json_md5;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::str::FromStr;
use tracing::{error, info, instrument};
use uuid::Uuid;

const APPLICATION_NAME: &str = "osmsync";

pub struct PgBossQueueProvider {
    pool: PgPool,
    schema: String,
    queue_name: String,
}

impl PgBossQueueProvider {
    /// Build a provider with a lazily connected pool; nothing touches the
    /// database until [`QueueProvider::start_queue`]
    pub fn new(config: &QueueConfig, queue_name: impl Into<String>) -> SyncResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| SyncError::config("PGBOSS_DATABASE_URL is required for the queue target"))?;

        let options = PgConnectOptions::from_str(url)
            .map_err(|err| SyncError::config(format!("invalid queue database url: {}", err)))?
            .application_name(APPLICATION_NAME);

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(options);

        Self::with_pool(pool, &config.schema, queue_name)
    }

    pub fn with_pool(pool: PgPool, schema: &str, queue_name: impl Into<String>) -> SyncResult<Self> {
        validate_identifier(schema)?;
        Ok(Self {
            pool,
            schema: schema.to_string(),
            queue_name: queue_name.into(),
        })
    }

    fn insert_job_sql(&self) -> String {
        format!(
            "INSERT INTO {}.job (id, name, data, singletonkey) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT DO NOTHING \
             RETURNING id",
            self.schema
        )
    }
}

/// The schema name is interpolated into SQL, so only plain identifiers pass
fn validate_identifier(schema: &str) -> SyncResult<()> {
    let valid = !schema.is_empty()
        && schema
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !schema.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(())
    } else {
        Err(SyncError::config(format!("invalid pg-boss schema '{}'", schema)))
    }
}

#[async_trait]
impl QueueProvider for PgBossQueueProvider {
    fn queue_name(&self) -> &str {
        &self.queue_name
    }

    #[instrument(skip(self), fields(queue_name = %self.queue_name))]
    async fn start_queue(&self) -> SyncResult<()> {
        info!("Starting pg-boss queue");

        let table: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
            .bind(format!("{}.job", self.schema))
            .fetch_one(&self.pool)
            .await
            .map_err(|err| {
                error!(error = %err, "Failed to start queue");
                SyncError::queue(err.to_string())
            })?;

        if table.is_none() {
            error!(schema = %self.schema, "pg-boss is not installed");
            return Err(SyncError::queue(format!(
                "pg-boss job table not found in schema '{}'",
                self.schema
            )));
        }

        Ok(())
    }

    #[instrument(skip(self), fields(queue_name = %self.queue_name))]
    async fn stop_queue(&self) -> SyncResult<()> {
        info!("Stopping pg-boss queue");
        self.pool.close().await;
        Ok(())
    }

    #[instrument(skip(self, payload), fields(queue_name = %self.queue_name, items = payload.items.len()))]
    async fn push(&self, payload: &TileRequestPayload) -> SyncResult<()> {
        info!("Pushing request into queue");

        let singleton_key = json_md5(payload)?;

        let inserted: Option<Uuid> = sqlx::query_scalar(&self.insert_job_sql())
            .bind(Uuid::new_v4())
            .bind(&self.queue_name)
            .bind(Json(payload))
            .bind(&singleton_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| {
                error!(error = %err, "Failed to push request into queue");
                SyncError::queue(err.to_string())
            })?;

        match inserted {
            Some(id) => {
                info!(job_id = %id, singleton_key, "Request queued");
                Ok(())
            },
            None => Err(SyncError::RequestAlreadyInQueue(self.queue_name.clone())),
        }
    }
}
