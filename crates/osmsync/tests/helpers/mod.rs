//! Test helpers for osmsync integration tests
//!
//! - A scripted [`ToolRunner`] that records invocations and writes expire lists
//! - An in-memory [`QueueProvider`] with pg-boss style deduplication
//! - A harness wiring an [`AppendManager`] to a wiremock replication feed

#![allow(dead_code)]

use async_trait::async_trait;
use osmsync::append::{AppendDependencies, AppendEntity, AppendManager, AppendOptions};
use osmsync::config::HttpConfig;
use osmsync::lock::NoopLock;
use osmsync::queue::{QueueProvider, QueueSettings, TileRequestPayload};
use osmsync::replication::{diff_path, ReplicationClient};
use osmsync::resources::ObjectStoreResourceProvider;
use osmsync::storage::memory::MemoryStore;
use osmsync::tools::{AppendArgs, ToolRunner};
use osmsync::{SyncError, SyncResult, UploadTarget};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PROJECT_ID: &str = "proj";
pub const BUCKET: &str = "osm";

pub fn state_blob(sequence: u64) -> String {
    format!(
        "#Sat Jan 01 00:00:00 UTC 2022\nsequenceNumber={}\ntimestamp=2022-01-01T00\\:00\\:00Z\n",
        sequence
    )
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        user_agent: "osmsync-test".to_string(),
    }
}

/// Sequence number encoded in a `<seq>.simplified.osc.gz` file name
fn sequence_of(diff: &Path) -> Option<u64> {
    diff.file_name()?.to_str()?.split('.').next()?.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Merge { input: PathBuf, output: PathBuf },
    Append { style: PathBuf, sequence: Option<u64>, args: Vec<String> },
    Create { style: PathBuf, dump: PathBuf },
}

/// Records every invocation instead of running osmium and osm2pgsql
#[derive(Default)]
pub struct FakeTools {
    calls: Mutex<Vec<ToolCall>>,
    expire_lines: Mutex<Option<String>>,
    fail_append_at: Mutex<Option<u64>>,
    terminations: AtomicUsize,
}

impl FakeTools {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tools writing `lines` to every requested expire output
    pub fn with_expire_lines(lines: &str) -> Arc<Self> {
        Arc::new(Self {
            expire_lines: Mutex::new(Some(lines.to_string())),
            ..Self::default()
        })
    }

    pub fn fail_append_at(&self, sequence: u64) {
        *self.fail_append_at.lock().unwrap() = Some(sequence);
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn merges(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ToolCall::Merge { .. }))
            .count()
    }

    pub fn appends(&self) -> Vec<ToolCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ToolCall::Append { .. }))
            .collect()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn merge_changes(&self, input: &Path, output: &Path) -> SyncResult<()> {
        self.calls.lock().unwrap().push(ToolCall::Merge {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        });
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn append(&self, args: &AppendArgs) -> SyncResult<()> {
        let sequence = sequence_of(&args.diff);
        self.calls.lock().unwrap().push(ToolCall::Append {
            style: args.style.clone(),
            sequence,
            args: args.to_args(),
        });

        if sequence.is_some() && *self.fail_append_at.lock().unwrap() == sequence {
            return Err(SyncError::Osm2pgsql {
                exit_code: Some(1),
                stderr: "ERROR: Connection to database failed".to_string(),
            });
        }

        let lines = self.expire_lines.lock().unwrap().clone();
        if let (Some(output), Some(lines)) = (&args.expire_output, lines) {
            tokio::fs::write(output, lines).await?;
        }

        Ok(())
    }

    async fn create(&self, style: &Path, dump: &Path) -> SyncResult<()> {
        self.calls.lock().unwrap().push(ToolCall::Create {
            style: style.to_path_buf(),
            dump: dump.to_path_buf(),
        });
        Ok(())
    }

    fn terminate_all(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Accepts a payload once per content hash, like pg-boss singleton jobs
#[derive(Default)]
pub struct MemoryQueue {
    keys: Mutex<HashSet<String>>,
    accepted: Mutex<Vec<TileRequestPayload>>,
    failure: Mutex<Option<String>>,
    duplicates: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every later push fails with a queue error carrying `message`
    pub fn fail_pushes(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn accepted(&self) -> Vec<TileRequestPayload> {
        self.accepted.lock().unwrap().clone()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    fn queue_name(&self) -> &str {
        "tiles"
    }

    async fn start_queue(&self) -> SyncResult<()> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_queue(&self) -> SyncResult<()> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn push(&self, payload: &TileRequestPayload) -> SyncResult<()> {
        if let Some(message) = self.failure.lock().unwrap().clone() {
            return Err(SyncError::queue(message));
        }

        let key = osmsync_common::json_md5(payload)?;
        if !self.keys.lock().unwrap().insert(key) {
            self.duplicates.fetch_add(1, Ordering::SeqCst);
            return Err(SyncError::RequestAlreadyInQueue("tiles".to_string()));
        }
        self.accepted.lock().unwrap().push(payload.clone());
        Ok(())
    }
}

/// Replication feed, bucket and tools for one project
pub struct Harness {
    pub server: MockServer,
    pub store: MemoryStore,
    pub tools: Arc<FakeTools>,
    pub queue: Option<Arc<MemoryQueue>>,
    pub work_dir: TempDir,
}

impl Harness {
    pub async fn new(tools: Arc<FakeTools>) -> Self {
        let store = MemoryStore::new(BUCKET);
        store.insert(format!("{}/roads.lua", PROJECT_ID), "return {}");

        Self {
            server: MockServer::start().await,
            store,
            tools,
            queue: None,
            work_dir: tempfile::tempdir().expect("Failed to create work dir"),
        }
    }

    pub fn with_queue(mut self) -> Self {
        self.queue = Some(MemoryQueue::new());
        self
    }

    pub fn replication_url(&self) -> String {
        format!("{}/replication", self.server.uri())
    }

    pub fn set_project_state(&self, sequence: u64) {
        self.store
            .insert(format!("{}/state.txt", PROJECT_ID), state_blob(sequence));
    }

    pub fn project_state(&self) -> String {
        self.store
            .object_string(&format!("{}/state.txt", PROJECT_ID))
            .expect("state blob should exist")
    }

    pub async fn mount_remote_state(&self, sequence: u64) {
        Mock::given(method("GET"))
            .and(path("/replication/state.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(state_blob(sequence)))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_diff(&self, sequence: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/replication/{}", diff_path(sequence))))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("diff {}", sequence)))
            .mount(&self.server)
            .await;
    }

    pub fn manager(&self, generate_expire_output: bool) -> AppendManager {
        let store = Arc::new(self.store.clone());
        let queue = self
            .queue
            .clone()
            .map(|queue| queue as Arc<dyn QueueProvider>);

        let dependencies = AppendDependencies {
            store: store.clone(),
            replication: ReplicationClient::new(&http_config()).expect("Failed to build client"),
            tools: self.tools.clone(),
            resources: Arc::new(ObjectStoreResourceProvider::new(store)),
            queue,
            lock: Arc::new(NoopLock),
        };
        let options = AppendOptions {
            work_dir: self.work_dir.path().to_path_buf(),
            generate_expire_output,
            queue_settings: self
                .queue
                .as_ref()
                .map(|_| QueueSettings::new("tiles", 0, 18).expect("valid queue settings")),
        };

        AppendManager::new(dependencies, options).expect("Failed to build manager")
    }

    pub async fn prepared_manager(
        &self,
        entities: Vec<AppendEntity>,
        targets: Vec<UploadTarget>,
        limit: Option<u64>,
    ) -> AppendManager {
        let mut manager = self.manager(true);
        manager
            .prepare_manager(PROJECT_ID, entities, targets, limit)
            .await
            .expect("Failed to prepare manager");
        manager
    }
}

pub fn roads() -> AppendEntity {
    serde_json::from_value(serde_json::json!({
        "id": "roads",
        "script": "roads.lua",
        "zoomLevel": {"min": 0, "max": 1}
    }))
    .expect("valid entity")
}
