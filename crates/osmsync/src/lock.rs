//! Mutual exclusion between instances appending to the same project
//!
//! The state blob is read-modify-written without any compare-and-swap, so two
//! writers on one project would corrupt each other's progress. Deployments
//! that can guarantee a single writer use [`NoopLock`].

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, Postgres};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ProjectLock: Send + Sync {
    /// Fails with [`SyncError::ProjectLocked`] when another holder exists
    async fn reserve(&self, project_id: &str) -> SyncResult<()>;

    async fn release(&self, project_id: &str) -> SyncResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLock;

#[async_trait]
impl ProjectLock for NoopLock {
    async fn reserve(&self, _project_id: &str) -> SyncResult<()> {
        Ok(())
    }

    async fn release(&self, _project_id: &str) -> SyncResult<()> {
        Ok(())
    }
}

/// Session level Postgres advisory lock keyed by `hashtext(project_id)`.
///
/// Advisory locks belong to the session that took them, so the connection is
/// held until release.
pub struct PgAdvisoryLock {
    pool: PgPool,
    held: Mutex<HashMap<String, PoolConnection<Postgres>>>,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }
}

fn lock_error(err: sqlx::Error) -> SyncError {
    SyncError::Lock(err.to_string())
}

#[async_trait]
impl ProjectLock for PgAdvisoryLock {
    async fn reserve(&self, project_id: &str) -> SyncResult<()> {
        let mut held = self.held.lock().await;
        if held.contains_key(project_id) {
            debug!(project_id, "Project lock already held by this instance");
            return Ok(());
        }

        let mut connection = self.pool.acquire().await.map_err(lock_error)?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(project_id)
            .fetch_one(&mut *connection)
            .await
            .map_err(lock_error)?;

        if !acquired {
            warn!(project_id, "Project is locked by another instance");
            return Err(SyncError::ProjectLocked(project_id.to_string()));
        }

        info!(project_id, "Project lock acquired");
        held.insert(project_id.to_string(), connection);
        Ok(())
    }

    async fn release(&self, project_id: &str) -> SyncResult<()> {
        let Some(mut connection) = self.held.lock().await.remove(project_id) else {
            return Ok(());
        };

        sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(project_id)
            .fetch_one(&mut *connection)
            .await
            .map_err(lock_error)?;

        info!(project_id, "Project lock released");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_lock_never_blocks() {
        let lock = NoopLock;
        lock.reserve("proj").await.unwrap();
        lock.reserve("proj").await.unwrap();
        lock.release("proj").await.unwrap();
    }

    #[tokio::test]
    async fn test_release_without_reserve_is_noop() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://osmsync@127.0.0.1:1/osmsync")
            .unwrap();
        let lock = PgAdvisoryLock::new(pool);
        lock.release("proj").await.unwrap();
    }
}
