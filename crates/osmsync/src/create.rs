//! Initial import of a project database from a full dump

use crate::error::{SyncError, SyncResult};
use crate::replication::DumpClient;
use crate::storage::ObjectStore;
use crate::tools::ToolRunner;
use clap::ValueEnum;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument};

pub const DEFAULT_DUMP_NAME: &str = "dump.osm.pbf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DumpSourceType {
    LocalFile,
    RemoteUrl,
    DumpServer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSource {
    LocalFile(PathBuf),
    RemoteUrl(String),
    /// Base url of a dump server; its latest dump is used
    DumpServer(String),
}

impl DumpSource {
    /// Pair a CLI source string with its type, checking that it can be used
    pub fn new(kind: DumpSourceType, source: &str) -> SyncResult<Self> {
        let invalid = |reason: &str| {
            SyncError::config(format!(
                "provided dump source of type {:?} is not valid, {} {}",
                kind, source, reason
            ))
        };

        match kind {
            DumpSourceType::LocalFile => {
                let path = PathBuf::from(source);
                if !path.exists() {
                    return Err(invalid("does not exist locally"));
                }
                Ok(Self::LocalFile(path))
            },
            DumpSourceType::RemoteUrl | DumpSourceType::DumpServer => {
                let is_web = Url::parse(source)
                    .map(|url| matches!(url.scheme(), "http" | "https"))
                    .unwrap_or(false);
                if !is_web {
                    return Err(invalid("is not a valid web uri"));
                }
                Ok(match kind {
                    DumpSourceType::DumpServer => Self::DumpServer(source.to_string()),
                    _ => Self::RemoteUrl(source.to_string()),
                })
            },
        }
    }
}

pub struct CreateManager {
    store: Arc<dyn ObjectStore>,
    dumps: DumpClient,
    tools: Arc<dyn ToolRunner>,
    work_dir: PathBuf,
}

impl CreateManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        dumps: DumpClient,
        tools: Arc<dyn ToolRunner>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            dumps,
            tools,
            work_dir: work_dir.into(),
        }
    }

    #[instrument(skip(self, source))]
    pub async fn create(&self, project_id: &str, script_key: &str, source: &DumpSource) -> SyncResult<()> {
        let script = self.fetch_script(&format!("{}/{}", project_id, script_key)).await?;

        let dump = match source {
            DumpSource::LocalFile(path) => path.clone(),
            DumpSource::RemoteUrl(url) => self.download_dump(url).await?,
            DumpSource::DumpServer(server) => {
                info!(server = %server, "Getting the latest dump from the dump server");
                let latest = self.dumps.latest_dump(server).await?;
                info!(dump = %latest.name, timestamp = %latest.timestamp, "Latest dump resolved");
                self.download_dump(&latest.url).await?
            },
        };

        let result = self.tools.create(&script, &dump).await;
        if result.is_err() {
            self.tools.terminate_all();
        }
        result?;

        info!(project_id, "Finished creating project");
        Ok(())
    }

    async fn fetch_script(&self, key: &str) -> SyncResult<PathBuf> {
        info!(key, "Getting script from the object store");

        if !self.store.bucket_exists().await? {
            error!(bucket = self.store.bucket(), "The specified bucket does not exist");
            return Err(SyncError::BucketDoesNotExist(self.store.bucket().to_string()));
        }

        let body = self.store.get_object(key).await?;
        let path = self.work_dir.join(key);
        write_file(&path, &body).await?;

        Ok(path)
    }

    async fn download_dump(&self, url: &str) -> SyncResult<PathBuf> {
        let path = self.work_dir.join(DEFAULT_DUMP_NAME);
        info!(url, path = %path.display(), "Getting dump from remote");
        self.dumps.download(url, &path).await?;
        Ok(path)
    }
}

async fn write_file(path: &Path, body: &[u8]) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, body).await?;
    Ok(())
}
