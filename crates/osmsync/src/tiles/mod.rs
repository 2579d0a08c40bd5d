//! Expired tile handling
//!
//! osm2pgsql reports the tiles touched by a diff as `z/x/y` lines. This module
//! turns such lists into WGS84 bounding boxes, compacting vertical runs of
//! adjacent tiles and filtering by zoom and by area.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::str::FromStr;

pub mod filters;
pub mod parser;

pub use filters::{bbox_filter, geometry_filter, zoom_filter, PostFilter, PreFilter};
pub use parser::{ExpireTilesParser, ParseOutcome, ParserOptions, SortOrder};

const TILE_SIZE: f64 = 256.0;
const RAD_TO_DEG: f64 = 180.0 / PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl FromStr for Tile {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.trim().split('/');
        let mut next = |name: &str| {
            parts
                .next()
                .ok_or_else(|| format!("tile '{}' is missing {}", line, name))?
                .parse::<u32>()
                .map_err(|err| format!("tile '{}' has an invalid {}: {}", line, name, err))
        };

        let tile = Tile {
            z: next("zoom")?,
            x: next("x")?,
            y: next("y")?,
        };

        if parts.next().is_some() {
            return Err(format!("tile '{}' has trailing components", line));
        }

        Ok(tile)
    }
}

/// Degrees in WGS84
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }
}

/// Pixel to lon/lat at `zoom`, spherical mercator with 256px tiles
fn pixel_to_lon_lat(px: f64, py: f64, zoom: u32) -> (f64, f64) {
    let size = TILE_SIZE * 2f64.powi(zoom as i32);
    let bc = size / 360.0;
    let cc = size / (2.0 * PI);
    let zc = size / 2.0;

    let g = (py - zc) / -cc;
    let lon = (px - zc) / bc;
    let lat = RAD_TO_DEG * (2.0 * g.exp().atan() - 0.5 * PI);

    (lon, lat)
}

impl Tile {
    pub fn bbox(&self) -> BoundingBox {
        let x = f64::from(self.x);
        let y = f64::from(self.y);

        let (west, south) = pixel_to_lon_lat(x * TILE_SIZE, (y + 1.0) * TILE_SIZE, self.z);
        let (east, north) = pixel_to_lon_lat((x + 1.0) * TILE_SIZE, y * TILE_SIZE, self.z);

        BoundingBox::new(west, south, east, north)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::BoundingBox;

    pub const MAX_LAT: f64 = 85.0511287798066;
    pub const MIN_LAT: f64 = -85.05112877980659;

    pub const WHOLE_GLOBE: BoundingBox = BoundingBox { west: -180.0, south: MIN_LAT, east: 180.0, north: MAX_LAT };
    pub const WESTERN_HEMISPHERE: BoundingBox = BoundingBox { west: -180.0, south: MIN_LAT, east: 0.0, north: MAX_LAT };
    pub const EASTERN_HEMISPHERE: BoundingBox = BoundingBox { west: 0.0, south: MIN_LAT, east: 180.0, north: MAX_LAT };
    pub const NORTH_EAST_QUARTER: BoundingBox = BoundingBox { west: 0.0, south: 0.0, east: 180.0, north: MAX_LAT };

    pub fn assert_bbox_eq(actual: &BoundingBox, expected: &BoundingBox) {
        let close = |a: f64, b: f64| (a - b).abs() < 1e-9;
        assert!(
            close(actual.west, expected.west)
                && close(actual.south, expected.south)
                && close(actual.east, expected.east)
                && close(actual.north, expected.north),
            "expected {:?}, got {:?}",
            expected,
            actual
        );
    }

    pub fn assert_bboxes_eq(actual: &[BoundingBox], expected: &[BoundingBox]) {
        assert_eq!(actual.len(), expected.len(), "expected {:?}, got {:?}", expected, actual);
        for (a, e) in actual.iter().zip(expected) {
            assert_bbox_eq(a, e);
        }
    }
}
