//! Incremental replication of a project
//!
//! One cycle downloads the diff after the project's current sequence number,
//! merges it with osmium, applies it to every entity with osm2pgsql, ships
//! the expired tiles and finally commits the new sequence number. Nothing is
//! committed unless every step of the cycle succeeded.

use crate::error::{SyncError, SyncResult};
use crate::lock::ProjectLock;
use crate::queue::{QueueProvider, QueueSettings};
use crate::replication::{ReplicationClient, DIFF_FILE_EXTENSION};
use crate::resources::{RemoteResource, RemoteResourceManager, ResourceProvider};
use crate::state::StateTracker;
use crate::storage::ObjectStore;
use crate::tools::{AppendArgs, ToolRunner};
use crate::upload::{EntityUpload, QueueTarget, UploadDispatcher, UploadTarget, EXPIRE_LIST};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

mod entity;

pub use entity::{load_entities, parse_entities, validate_entities, AppendEntity, ZoomLevel};

/// Collaborators of an [`AppendManager`], assembled once at startup
pub struct AppendDependencies {
    pub store: Arc<dyn ObjectStore>,
    pub replication: ReplicationClient,
    pub tools: Arc<dyn ToolRunner>,
    pub resources: Arc<dyn ResourceProvider>,
    pub queue: Option<Arc<dyn QueueProvider>>,
    pub lock: Arc<dyn ProjectLock>,
}

#[derive(Debug, Clone)]
pub struct AppendOptions {
    pub work_dir: PathBuf,
    pub generate_expire_output: bool,
    pub queue_settings: Option<QueueSettings>,
}

/// Result of one step of the continuous loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Appended,
    UpToDate,
    LimitReached,
}

pub struct AppendManager {
    state: StateTracker,
    store: Arc<dyn ObjectStore>,
    replication: ReplicationClient,
    tools: Arc<dyn ToolRunner>,
    resources: RemoteResourceManager,
    queue: Option<Arc<dyn QueueProvider>>,
    queue_settings: Option<QueueSettings>,
    lock: Arc<dyn ProjectLock>,
    work_dir: PathBuf,
    generate_expire_output: bool,
    entities: Vec<AppendEntity>,
    dispatcher: Option<UploadDispatcher>,
    queue_started: bool,
}

impl AppendManager {
    pub fn new(dependencies: AppendDependencies, options: AppendOptions) -> SyncResult<Self> {
        let AppendDependencies {
            store,
            replication,
            tools,
            resources,
            queue,
            lock,
        } = dependencies;

        let state = StateTracker::new(store.clone(), replication.clone(), &options.work_dir)?;
        let resources = RemoteResourceManager::new(resources, &options.work_dir);

        Ok(Self {
            state,
            store,
            replication,
            tools,
            resources,
            queue,
            queue_settings: options.queue_settings,
            lock,
            work_dir: options.work_dir,
            generate_expire_output: options.generate_expire_output,
            entities: Vec::new(),
            dispatcher: None,
            queue_started: false,
        })
    }

    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    pub fn entities(&self) -> &[AppendEntity] {
        &self.entities
    }

    /// Validate the project, load its scripts and geometries and start the
    /// queue when one is configured
    #[instrument(skip(self, entities, targets), fields(entities = entities.len()))]
    pub async fn prepare_manager(
        &mut self,
        project_id: &str,
        entities: Vec<AppendEntity>,
        targets: Vec<UploadTarget>,
        limit: Option<u64>,
    ) -> SyncResult<()> {
        validate_entities(&entities)?;
        if limit == Some(0) {
            return Err(SyncError::config("append limit must be at least 1"));
        }

        let queue_target = match (&self.queue, &self.queue_settings) {
            (Some(provider), Some(settings)) => Some(QueueTarget {
                provider: provider.clone(),
                settings: settings.clone(),
            }),
            _ => None,
        };
        let dispatcher = UploadDispatcher::new(targets, self.store.clone(), queue_target)?;
        info!(targets = ?dispatcher.targets(), "Upload targets configured");

        self.state.prepare_environment(project_id, limit).await?;

        let mut resources = Vec::with_capacity(entities.len() * 2);
        for entity in &entities {
            resources.push(RemoteResource::script(entity.script_key(project_id)));
            if let Some(key) = &entity.geometry_key {
                resources.push(RemoteResource::geometry(key.clone()));
            }
        }
        self.resources.load(resources).await?;

        self.entities = entities;
        self.dispatcher = Some(dispatcher);

        if let Some(queue) = &self.queue {
            queue.start_queue().await?;
            self.queue_started = true;
        }

        Ok(())
    }

    /// Append until the project is up to date or the limit is exhausted
    pub async fn append(&mut self, replication_url: &str) -> SyncResult<()> {
        let project_id = self.state.project_id().to_string();
        self.lock.reserve(&project_id).await?;

        let result = self.append_batch(replication_url).await;
        let released = self.lock.release(&project_id).await;

        result.and(released)
    }

    async fn append_batch(&mut self, replication_url: &str) -> SyncResult<()> {
        self.state.load_start_sequence_number().await?;
        self.state.load_replication_sequence_number(replication_url).await?;

        if self.state.is_up_to_date_or_reached_limit() {
            info!(
                project_id = self.state.project_id(),
                state = self.state.current(),
                "State is up to date, there is nothing to append"
            );
            return Ok(());
        }

        while !self.state.is_up_to_date_or_reached_limit() {
            self.append_next_state(replication_url).await?;
        }

        info!(
            project_id = self.state.project_id(),
            start = self.state.start(),
            current = self.state.current(),
            total_appends = self.state.total_appends(),
            "Successfully appended project"
        );
        Ok(())
    }

    /// Run exactly one cycle for the next sequence number.
    ///
    /// On failure every child process is killed, local artifacts are removed
    /// and the project's state is left untouched.
    pub async fn append_next_state(&mut self, replication_url: &str) -> SyncResult<()> {
        let sequence = self.state.next_state();
        info!(
            project_id = self.state.project_id(),
            state = sequence,
            entities = self.entities.len(),
            "Attempting to append state on entities"
        );

        let result = self.run_cycle(replication_url, sequence).await;
        if result.is_err() {
            self.tools.terminate_all();
        }
        self.remove_artifacts(sequence).await;
        result?;

        self.state.update_remote_state().await?;
        self.state.update_remaining_appends();
        Ok(())
    }

    async fn run_cycle(&self, replication_url: &str, sequence: u64) -> SyncResult<()> {
        let diff = self.diff_path(sequence);
        self.replication
            .download_diff(replication_url, sequence, &diff)
            .await?;

        let merged = self.simplified_diff_path(sequence);
        info!(diff = %diff.display(), state = sequence, "Simplifying osm change file");
        self.tools.merge_changes(&diff, &merged).await?;

        try_join_all(
            self.entities
                .iter()
                .map(|entity| self.append_entity(entity, &merged, sequence)),
        )
        .await?;

        if self.generate_expire_output {
            self.upload_expired(sequence).await?;
        }

        Ok(())
    }

    async fn append_entity(&self, entity: &AppendEntity, diff: &Path, sequence: u64) -> SyncResult<()> {
        let style = self
            .resources
            .script_path(&entity.script_key(self.state.project_id()))?;

        let args = AppendArgs {
            style,
            expire_tiles: entity.zoom_level.map(|zoom| zoom.range()),
            expire_output: self
                .generate_expire_output
                .then(|| self.expire_list_path(&entity.id, sequence)),
            diff: diff.to_path_buf(),
        };

        info!(
            entity_id = %entity.id,
            expire_tiles = args.expire_tiles.as_deref().unwrap_or("default"),
            project_id = self.state.project_id(),
            "Attempting to osm2pgsql append"
        );

        self.tools.append(&args).await
    }

    async fn upload_expired(&self, sequence: u64) -> SyncResult<()> {
        let Some(dispatcher) = &self.dispatcher else {
            return Ok(());
        };
        if dispatcher.targets().is_empty() {
            return Ok(());
        }

        info!(targets = ?dispatcher.targets(), "Uploading expired tiles to upload targets");

        let mut uploads = Vec::with_capacity(self.entities.len());
        let mut paths = Vec::with_capacity(self.entities.len());
        for entity in &self.entities {
            let filter = entity
                .geometry_key
                .as_deref()
                .map(|key| self.resources.filter(key))
                .transpose()?;
            paths.push(self.expire_list_path(&entity.id, sequence));
            uploads.push((entity, filter));
        }

        let project_id = self.state.project_id();
        try_join_all(uploads.into_iter().zip(paths.iter()).map(|((entity, filter), path)| {
            let upload = EntityUpload {
                project_id,
                entity_id: &entity.id,
                sequence,
                expire_list: path,
                filter,
            };
            async move { dispatcher.dispatch(&upload).await }
        }))
        .await?;

        Ok(())
    }

    /// Continuous mode.
    ///
    /// Cycles run back to back while there is work. When up to date, or after
    /// a failed cycle, the loop waits `wait` before checking again. The
    /// shutdown token is checked between steps and cuts the wait short; a
    /// cycle in flight always runs to completion.
    pub async fn append_forever(
        &mut self,
        replication_url: &str,
        wait: Duration,
        shutdown: CancellationToken,
    ) -> SyncResult<()> {
        info!(
            project_id = self.state.project_id(),
            wait_secs = wait.as_secs(),
            "Starting continuous append"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested, stopping continuous append");
                break;
            }

            match self.append_step(replication_url).await {
                Ok(CycleOutcome::Appended) => continue,
                Ok(CycleOutcome::LimitReached) => break,
                Ok(CycleOutcome::UpToDate) => {
                    debug!(state = self.state.current(), "Up to date, waiting for new diffs");
                },
                Err(err) => {
                    error!(
                        error = %err,
                        project_id = self.state.project_id(),
                        state = self.state.next_state(),
                        "Append cycle failed, retrying after wait"
                    );
                },
            }

            tokio::select! {
                _ = shutdown.cancelled() => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }

        self.stop().await;
        Ok(())
    }

    /// One step of the continuous loop, under the project lock
    pub async fn append_step(&mut self, replication_url: &str) -> SyncResult<CycleOutcome> {
        let project_id = self.state.project_id().to_string();
        self.lock.reserve(&project_id).await?;

        let result = self.append_step_locked(replication_url).await;
        let released = self.lock.release(&project_id).await;

        match (result, released) {
            (Ok(outcome), Ok(())) => Ok(outcome),
            (Err(err), _) | (Ok(_), Err(err)) => Err(err),
        }
    }

    async fn append_step_locked(&mut self, replication_url: &str) -> SyncResult<CycleOutcome> {
        if self.state.has_reached_limit() {
            info!(total_appends = self.state.total_appends(), "Append limit has been reached");
            return Ok(CycleOutcome::LimitReached);
        }

        self.state.load_start_sequence_number().await?;
        self.state.load_replication_sequence_number(replication_url).await?;

        if self.state.is_up_to_date() {
            return Ok(CycleOutcome::UpToDate);
        }

        self.append_next_state(replication_url).await?;
        Ok(CycleOutcome::Appended)
    }

    /// Stop the queue and kill leftover children; failures are only logged
    pub async fn stop(&mut self) {
        self.tools.terminate_all();

        if !self.queue_started {
            return;
        }
        if let Some(queue) = &self.queue {
            if let Err(err) = queue.stop_queue().await {
                warn!(error = %err, queue_name = queue.queue_name(), "Failed to stop queue");
            }
        }
        self.queue_started = false;
    }

    fn diff_path(&self, sequence: u64) -> PathBuf {
        self.work_dir
            .join(format!("{}.{}", sequence, DIFF_FILE_EXTENSION))
    }

    fn simplified_diff_path(&self, sequence: u64) -> PathBuf {
        self.work_dir
            .join(format!("{}.simplified.{}", sequence, DIFF_FILE_EXTENSION))
    }

    fn expire_list_path(&self, entity_id: &str, sequence: u64) -> PathBuf {
        self.state
            .project_dir()
            .join(format!("{}.{}.{}", entity_id, sequence, EXPIRE_LIST))
    }

    async fn remove_artifacts(&self, sequence: u64) {
        let mut paths = vec![self.diff_path(sequence), self.simplified_diff_path(sequence)];
        paths.extend(
            self.entities
                .iter()
                .map(|entity| self.expire_list_path(&entity.id, sequence)),
        );

        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed cycle artifact"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove cycle artifact"),
            }
        }
    }
}
