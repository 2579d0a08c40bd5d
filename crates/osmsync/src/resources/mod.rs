//! Remote resources a project depends on
//!
//! Transform scripts and geometry filters are fetched once per manager
//! preparation and cached for every cycle that follows.

use crate::error::{SyncError, SyncResult};
use crate::storage::ObjectStore;
use async_trait::async_trait;
use std::sync::Arc;

pub mod manager;

pub use manager::{LoadedResource, RemoteResourceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Lua style handed to osm2pgsql, materialized on disk
    Script,
    /// GeoJSON or `[west, south, east, north]`, held in memory as a filter
    Geometry,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteResource {
    pub id: String,
    pub kind: ResourceKind,
}

impl RemoteResource {
    pub fn script(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ResourceKind::Script,
        }
    }

    pub fn geometry(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ResourceKind::Geometry,
        }
    }
}

/// Source of raw resource content
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn get_resource(&self, id: &str) -> SyncResult<String>;
}

/// Reads resources straight out of the project bucket, keyed by id
pub struct ObjectStoreResourceProvider {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreResourceProvider {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResourceProvider for ObjectStoreResourceProvider {
    async fn get_resource(&self, id: &str) -> SyncResult<String> {
        let body = self.store.get_object(id).await?;
        String::from_utf8(body).map_err(|err| SyncError::RemoteResourceNotFound {
            id: id.to_string(),
            message: format!("content is not valid UTF-8: {}", err),
        })
    }
}
