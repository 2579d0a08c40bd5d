use super::{RemoteResource, ResourceKind, ResourceProvider};
use crate::error::{SyncError, SyncResult};
use crate::tiles::{bbox_filter, geometry_filter, PostFilter};
use futures::future::try_join_all;
use geojson::GeoJson;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A resource after it has been fetched and materialized
#[derive(Clone)]
pub enum LoadedResource {
    Script(PathBuf),
    Filter(PostFilter),
}

pub struct RemoteResourceManager {
    provider: Arc<dyn ResourceProvider>,
    work_dir: PathBuf,
    cache: HashMap<String, LoadedResource>,
}

impl RemoteResourceManager {
    pub fn new(provider: Arc<dyn ResourceProvider>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            work_dir: work_dir.into(),
            cache: HashMap::new(),
        }
    }

    /// Fetch every resource concurrently and cache the results.
    ///
    /// Duplicate ids are fetched once. If any fetch fails nothing is cached.
    #[instrument(skip_all, fields(count = resources.len()))]
    pub async fn load(&mut self, resources: Vec<RemoteResource>) -> SyncResult<()> {
        let mut seen = HashSet::new();
        let unique: Vec<RemoteResource> = resources
            .into_iter()
            .filter(|resource| seen.insert(resource.id.clone()))
            .collect();

        let provider = &self.provider;
        let work_dir = self.work_dir.as_path();
        let loaded = try_join_all(
            unique
                .iter()
                .map(|resource| fetch_resource(provider.as_ref(), work_dir, resource)),
        )
        .await?;

        info!(loaded = loaded.len(), "Remote resources loaded");

        self.cache.extend(loaded);
        Ok(())
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.cache.contains_key(id)
    }

    /// Local path of a loaded script
    pub fn script_path(&self, id: &str) -> SyncResult<PathBuf> {
        match self.cache.get(id) {
            Some(LoadedResource::Script(path)) => Ok(path.clone()),
            _ => Err(SyncError::ResourceNotLoaded(id.to_string())),
        }
    }

    /// Post filter built from a loaded geometry
    pub fn filter(&self, id: &str) -> SyncResult<PostFilter> {
        match self.cache.get(id) {
            Some(LoadedResource::Filter(filter)) => Ok(filter.clone()),
            _ => Err(SyncError::ResourceNotLoaded(id.to_string())),
        }
    }
}

async fn fetch_resource(
    provider: &dyn ResourceProvider,
    work_dir: &Path,
    resource: &RemoteResource,
) -> SyncResult<(String, LoadedResource)> {
    let id = resource.id.as_str();
    let content = provider
        .get_resource(id)
        .await
        .map_err(|err| match err {
            SyncError::RemoteResourceNotFound { .. } => err,
            other => SyncError::RemoteResourceNotFound {
                id: id.to_string(),
                message: other.to_string(),
            },
        })?;

    debug!(id, kind = ?resource.kind, bytes = content.len(), "Fetched remote resource");

    let loaded = match resource.kind {
        ResourceKind::Script => {
            let path = work_dir.join(id);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, content.as_bytes()).await?;
            LoadedResource::Script(path)
        },
        ResourceKind::Geometry => LoadedResource::Filter(parse_geometry(id, &content)?),
    };

    Ok((id.to_string(), loaded))
}

/// GeoJSON first, then a plain `[west, south, east, north]` array
fn parse_geometry(id: &str, content: &str) -> SyncResult<PostFilter> {
    let invalid = || SyncError::InvalidGeometry(id.to_string());

    let value: serde_json::Value = serde_json::from_str(content).map_err(|_| invalid())?;

    if let Ok(geojson) = GeoJson::from_json_value(value.clone()) {
        if let Ok(geometry) = geo::Geometry::<f64>::try_from(geojson) {
            return Ok(geometry_filter(geometry));
        }
    }

    serde_json::from_value::<[f64; 4]>(value)
        .map(bbox_filter)
        .map_err(|_| invalid())
}
