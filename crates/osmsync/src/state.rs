//! Durable replication progress for one project
//!
//! The state blob lives at `<project>/state.txt` and carries a
//! `sequenceNumber=<n>` marker alongside whatever else the writer put there
//! (typically an escaped timestamp). Only the marker is ever rewritten.

use crate::error::{SyncError, SyncResult};
use crate::replication::{ReplicationClient, STATE_FILE};
use crate::storage::ObjectStore;
use regex::{NoExpand, Regex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Value of every sequence number before it is loaded
pub const DEFAULT_SEQUENCE_NUMBER: i64 = -1;

const SEQUENCE_NUMBER_PATTERN: &str = r"sequenceNumber=(\d+)";

pub struct StateTracker {
    store: Arc<dyn ObjectStore>,
    replication: ReplicationClient,
    work_dir: PathBuf,
    pattern: Regex,
    project_id: String,
    start: i64,
    current: i64,
    replication_remote: i64,
    total_appends: u64,
    remaining_appends: Option<u64>,
    requested_appends: Option<u64>,
    content: String,
}

impl StateTracker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        replication: ReplicationClient,
        work_dir: impl Into<PathBuf>,
    ) -> SyncResult<Self> {
        Ok(Self {
            store,
            replication,
            work_dir: work_dir.into(),
            pattern: Regex::new(SEQUENCE_NUMBER_PATTERN)?,
            project_id: String::new(),
            start: DEFAULT_SEQUENCE_NUMBER,
            current: DEFAULT_SEQUENCE_NUMBER,
            replication_remote: DEFAULT_SEQUENCE_NUMBER,
            total_appends: 0,
            remaining_appends: None,
            requested_appends: None,
            content: String::new(),
        })
    }

    /// Create the project's local directory and make sure the bucket exists
    #[instrument(skip(self))]
    pub async fn prepare_environment(&mut self, project_id: &str, limit: Option<u64>) -> SyncResult<()> {
        info!(project_id, "Preparing environment");

        self.project_id = project_id.to_string();
        self.requested_appends = limit;
        self.remaining_appends = limit;

        let dir = self.project_dir();
        debug!(dir = %dir.display(), "Creating project directory");
        tokio::fs::create_dir_all(&dir).await?;

        if !self.store.bucket_exists().await? {
            error!(bucket = self.store.bucket(), "The specified bucket does not exist");
            return Err(SyncError::BucketDoesNotExist(self.store.bucket().to_string()));
        }

        Ok(())
    }

    /// Read the project's state blob and reset `start` and `current` to it
    pub async fn load_start_sequence_number(&mut self) -> SyncResult<()> {
        let key = self.state_key();
        info!(project_id = %self.project_id, key = %key, "Getting the start sequence number");

        let body = self.store.get_object(&key).await?;
        let content = String::from_utf8(body)
            .map_err(|err| SyncError::invalid_state(&key, format!("not valid UTF-8: {}", err)))?;

        let sequence = self.parse_sequence_number(&key, &content)?;
        self.content = content;
        self.start = sequence;
        self.current = sequence;

        info!(project_id = %self.project_id, start = sequence, "Start sequence number loaded");
        Ok(())
    }

    /// Read the feed's own state file
    pub async fn load_replication_sequence_number(&mut self, replication_url: &str) -> SyncResult<()> {
        info!(replication_url, "Getting the remote replication sequence number");

        let content = self.replication.get_state(replication_url).await?;
        self.replication_remote = self.parse_sequence_number(replication_url, &content)?;

        info!(
            replication_url,
            remote = self.replication_remote,
            "Replication sequence number loaded"
        );
        Ok(())
    }

    fn parse_sequence_number(&self, source: &str, content: &str) -> SyncResult<i64> {
        let sequence = self
            .pattern
            .captures(content)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse::<i64>().ok());

        sequence.ok_or_else(|| {
            error!(source, "Failed to fetch sequence number out of the state file");
            SyncError::invalid_state(source, "could not fetch sequence number out of the state file")
        })
    }

    /// A feed that is behind the project also counts as nothing to do
    pub fn is_up_to_date(&self) -> bool {
        self.current >= self.replication_remote
    }

    pub fn has_reached_limit(&self) -> bool {
        self.remaining_appends == Some(0)
    }

    pub fn is_up_to_date_or_reached_limit(&self) -> bool {
        if self.has_reached_limit() {
            info!(limit = ?self.requested_appends, "Append limit has been reached");
            return true;
        }
        self.is_up_to_date()
    }

    pub fn next_state(&self) -> u64 {
        u64::try_from(self.current + 1).unwrap_or_default()
    }

    /// Persist the next sequence number, then advance.
    ///
    /// If the put fails neither `current` nor the cached blob change.
    #[instrument(skip(self), fields(project_id = %self.project_id))]
    pub async fn update_remote_state(&mut self) -> SyncResult<()> {
        let next = self.next_state();
        info!(from = self.current, to = next, "Updating remote state");

        let replacement = format!("sequenceNumber={}", next);
        let content = self
            .pattern
            .replacen(&self.content, 1, NoExpand(&replacement))
            .into_owned();

        self.store
            .put_object(&self.state_key(), content.clone().into_bytes())
            .await?;

        self.content = content;
        self.current += 1;
        self.total_appends += 1;

        info!(current = self.current, "Remote state updated");
        Ok(())
    }

    pub fn update_remaining_appends(&mut self) {
        let (Some(remaining), Some(requested)) = (self.remaining_appends, self.requested_appends) else {
            return;
        };

        info!(
            append = requested - remaining + 1,
            requested,
            "Append of the requested batch has finished"
        );
        self.remaining_appends = Some(remaining.saturating_sub(1));
    }

    pub fn state_key(&self) -> String {
        format!("{}/{}", self.project_id, STATE_FILE)
    }

    pub fn project_dir(&self) -> PathBuf {
        self.work_dir.join(&self.project_id)
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn replication_remote(&self) -> i64 {
        self.replication_remote
    }

    pub fn total_appends(&self) -> u64 {
        self.total_appends
    }

    pub fn remaining_appends(&self) -> Option<u64> {
        self.remaining_appends
    }
}
