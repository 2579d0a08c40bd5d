//! Routing of expired tile lists to their consumers

use crate::error::{SyncError, SyncResult};
use crate::queue::{QueueProvider, QueueSettings, TileRequestPayload};
use crate::storage::ObjectStore;
use crate::tiles::{ExpireTilesParser, ParserOptions, PostFilter};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// File name of an expire list, both locally and in the bucket
pub const EXPIRE_LIST: &str = "expire.list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize)]
pub enum UploadTarget {
    /// Raw list into the project bucket
    #[value(name = "s3")]
    #[serde(rename = "s3")]
    ObjectStore,
    /// Compacted bounding boxes pushed as a tile request
    #[value(name = "queue")]
    #[serde(rename = "queue")]
    Queue,
}

impl fmt::Display for UploadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadTarget::ObjectStore => write!(f, "s3"),
            UploadTarget::Queue => write!(f, "queue"),
        }
    }
}

/// Queue provider together with the zoom range stamped on its payloads
#[derive(Clone)]
pub struct QueueTarget {
    pub provider: Arc<dyn QueueProvider>,
    pub settings: QueueSettings,
}

/// Everything needed to ship one entity's expire list for one sequence
pub struct EntityUpload<'a> {
    pub project_id: &'a str,
    pub entity_id: &'a str,
    pub sequence: u64,
    pub expire_list: &'a Path,
    pub filter: Option<PostFilter>,
}

impl EntityUpload<'_> {
    pub fn object_key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.project_id, self.entity_id, self.sequence, EXPIRE_LIST
        )
    }
}

pub struct UploadDispatcher {
    targets: BTreeSet<UploadTarget>,
    store: Arc<dyn ObjectStore>,
    queue: Option<QueueTarget>,
}

impl UploadDispatcher {
    pub fn new(
        targets: impl IntoIterator<Item = UploadTarget>,
        store: Arc<dyn ObjectStore>,
        queue: Option<QueueTarget>,
    ) -> SyncResult<Self> {
        let targets: BTreeSet<UploadTarget> = targets.into_iter().collect();

        if targets.contains(&UploadTarget::Queue) && queue.is_none() {
            return Err(SyncError::config(
                "the queue upload target requires a queue name and zoom range",
            ));
        }

        Ok(Self {
            targets,
            store,
            queue,
        })
    }

    pub fn targets(&self) -> &BTreeSet<UploadTarget> {
        &self.targets
    }

    /// Ship one entity's expire list to every target.
    ///
    /// A missing or empty list is a no-op. A duplicate queue request is
    /// logged and treated as delivered; any other failure is returned.
    #[instrument(skip_all, fields(project_id = upload.project_id, entity_id = upload.entity_id, sequence = upload.sequence))]
    pub async fn dispatch(&self, upload: &EntityUpload<'_>) -> SyncResult<()> {
        if self.targets.is_empty() {
            return Ok(());
        }

        let content = match tokio::fs::read(upload.expire_list).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %upload.expire_list.display(), "No expire list was generated, nothing to upload");
                return Ok(());
            },
            Err(err) => return Err(err.into()),
        };

        let text = String::from_utf8_lossy(&content);
        let lines = unique_lines(&text);
        if lines.is_empty() {
            info!(reason = "generated expire list is empty", "No expired tiles to upload");
            return Ok(());
        }

        for target in &self.targets {
            match target {
                UploadTarget::ObjectStore => self.upload_to_store(upload, content.clone()).await?,
                UploadTarget::Queue => self.push_to_queue(upload, &lines).await?,
            }
        }

        Ok(())
    }

    async fn upload_to_store(&self, upload: &EntityUpload<'_>, content: Vec<u8>) -> SyncResult<()> {
        let key = upload.object_key();
        info!(bucket = self.store.bucket(), key = %key, "Uploading expired tiles to the object store");
        self.store.put_object(&key, content).await
    }

    async fn push_to_queue(&self, upload: &EntityUpload<'_>, lines: &[&str]) -> SyncResult<()> {
        let Some(queue) = &self.queue else {
            return Err(SyncError::config("queue target selected without a queue"));
        };

        let parser = ExpireTilesParser::new(ParserOptions {
            filter_max_zoom: true,
            post_filters: upload.filter.iter().cloned().collect(),
            ..ParserOptions::default()
        });
        let outcome = parser.parse(lines);

        info!(
            pre_filters = outcome.pre_filters_applied,
            post_filters = outcome.post_filters_applied,
            pre_tiles = lines.len(),
            post_boxes = outcome.boxes.len(),
            "Filtered expired tiles"
        );

        if outcome.boxes.is_empty() {
            info!(reason = "all tiles were filtered", "No expired tiles to push to queue");
            return Ok(());
        }

        let payload = TileRequestPayload::expired_tiles(outcome.boxes, &queue.settings);
        debug!(queue_name = queue.provider.queue_name(), ?payload, "Pushing expired tiles payload");

        match queue.provider.push(&payload).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_already_queued() => {
                warn!(error = %err, sequence = upload.sequence, "Request already in queue");
                Ok(())
            },
            Err(err) => Err(err),
        }
    }
}

/// Trimmed non-empty lines, first occurrence kept
fn unique_lines(text: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && seen.insert(*line))
        .collect()
}
