//! Expired tile notifications for downstream renderers
//!
//! Each processed entity produces at most one [`TileRequestPayload`] per
//! cycle. Pushes are idempotent: the backend keys jobs by a hash of the
//! payload and reports a repeat as [`SyncError::RequestAlreadyInQueue`].
//!
//! [`SyncError::RequestAlreadyInQueue`]: crate::error::SyncError::RequestAlreadyInQueue

use crate::error::{SyncError, SyncResult};
use crate::tiles::BoundingBox;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod pgboss;

pub use pgboss::PgBossQueueProvider;

pub const EXPIRED_TILES_SOURCE: &str = "expiredTiles";

/// Highest zoom a tile request may ask for
pub const MAX_QUEUE_ZOOM: u8 = 20;

/// Queue selection and the zoom range stamped on every pushed item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    pub name: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>, min_zoom: u8, max_zoom: u8) -> SyncResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SyncError::config("queue name cannot be empty"));
        }
        if min_zoom > MAX_QUEUE_ZOOM || max_zoom > MAX_QUEUE_ZOOM {
            return Err(SyncError::config(format!(
                "queue zoom levels must be between 0 and {}",
                MAX_QUEUE_ZOOM
            )));
        }
        if min_zoom > max_zoom {
            return Err(SyncError::config(format!(
                "queue min zoom {} is greater than max zoom {}",
                min_zoom, max_zoom
            )));
        }

        Ok(Self {
            name,
            min_zoom,
            max_zoom,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileRequestItem {
    pub area: BoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRequestPayload {
    pub items: Vec<TileRequestItem>,
    pub source: String,
}

impl TileRequestPayload {
    /// One item per area, all sharing the configured zoom range
    pub fn expired_tiles(areas: Vec<BoundingBox>, settings: &QueueSettings) -> Self {
        let items = areas
            .into_iter()
            .map(|area| TileRequestItem {
                area,
                min_zoom: settings.min_zoom,
                max_zoom: settings.max_zoom,
            })
            .collect();

        Self {
            items,
            source: EXPIRED_TILES_SOURCE.to_string(),
        }
    }
}

#[async_trait]
pub trait QueueProvider: Send + Sync {
    fn queue_name(&self) -> &str;

    /// Failure here is fatal for the run
    async fn start_queue(&self) -> SyncResult<()>;

    async fn stop_queue(&self) -> SyncResult<()>;

    async fn push(&self, payload: &TileRequestPayload) -> SyncResult<()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_wire_shape() {
        let settings = QueueSettings::new("tiles", 0, 18).unwrap();
        let payload =
            TileRequestPayload::expired_tiles(vec![BoundingBox::new(0.0, 0.0, 90.0, 45.0)], &settings);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "items": [{
                    "area": {"west": 0.0, "south": 0.0, "east": 90.0, "north": 45.0},
                    "minZoom": 0,
                    "maxZoom": 18
                }],
                "source": "expiredTiles"
            })
        );
    }

    #[test]
    fn test_settings_validation() {
        assert!(QueueSettings::new("tiles", 5, 5).is_ok());
        assert!(matches!(QueueSettings::new("tiles", 6, 5), Err(SyncError::Config(_))));
        assert!(matches!(QueueSettings::new("tiles", 0, 21), Err(SyncError::Config(_))));
        assert!(matches!(QueueSettings::new("", 0, 1), Err(SyncError::Config(_))));
    }
}
