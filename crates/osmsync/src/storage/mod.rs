//! Object store access
//!
//! Durable state, transform scripts, geometry filters and expired tile
//! lists all live in one bucket. [`ObjectStore`] is the contract the rest of
//! the crate relies on, [`S3Storage`] is the production implementation and
//! [`memory::MemoryStore`] backs local runs and tests.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

pub mod config;
pub mod memory;

pub use config::{ObjectAcl, StorageConfig};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn bucket_exists(&self) -> SyncResult<bool>;

    async fn get_object(&self, key: &str) -> SyncResult<Vec<u8>>;

    /// Writes carry the store's configured ACL
    async fn put_object(&self, key: &str, body: Vec<u8>) -> SyncResult<()>;
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    acl: ObjectAcl,
}

impl S3Storage {
    pub async fn new(config: StorageConfig) -> SyncResult<Self> {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            bucket = %config.bucket,
            "Initializing S3 storage"
        );

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version_latest()
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "osmsync-storage",
                )),
            _ => {
                let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());

        info!(bucket = %config.bucket, acl = %config.acl, "Storage client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
            acl: config.acl,
        })
    }

    pub fn acl(&self) -> ObjectAcl {
        self.acl
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn bucket_exists(&self) -> SyncResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(false)
                } else {
                    Err(SyncError::Storage(format!(
                        "failed to check bucket '{}': {}",
                        self.bucket,
                        DisplayErrorContext(&err)
                    )))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn get_object(&self, key: &str) -> SyncResult<Vec<u8>> {
        debug!("Downloading s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| SyncError::GetObject {
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|err| SyncError::GetObject {
                key: key.to_string(),
                message: err.to_string(),
            })?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    #[instrument(skip(self, body), fields(size = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>) -> SyncResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .acl(self.acl.to_canned())
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| SyncError::PutObject {
                key: key.to_string(),
                message: DisplayErrorContext(&err).to_string(),
            })?;

        info!("Uploaded s3://{}/{}", self.bucket, key);

        Ok(())
    }
}
