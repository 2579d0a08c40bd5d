use super::BoundingBox;
use geo::{coord, Geometry, Rect, Relate};
use std::sync::Arc;

/// Predicate over a raw `z/x/y` line, applied before parsing
pub type PreFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Predicate over a single tile's bounding box
pub type PostFilter = Arc<dyn Fn(&BoundingBox) -> bool + Send + Sync>;

/// Zoom component of a `z/x/y` line, without parsing the rest
pub(crate) fn line_zoom(line: &str) -> Option<u32> {
    line.trim().split('/').next()?.parse().ok()
}

/// Keep only lines at exactly `zoom`
pub fn zoom_filter(zoom: u32) -> PreFilter {
    Arc::new(move |line: &str| line_zoom(line) == Some(zoom))
}

/// Keep tiles that lie inside `[west, south, east, north]`
pub fn bbox_filter(container: [f64; 4]) -> PostFilter {
    let [west, south, east, north] = container;
    Arc::new(move |bbox: &BoundingBox| {
        bbox.west >= west && bbox.south >= south && bbox.east <= east && bbox.north <= north
    })
}

/// Keep tiles whose footprint is contained by `geometry`.
///
/// Tiles touching the geometry's boundary from the inside still count as
/// contained.
pub fn geometry_filter(geometry: Geometry<f64>) -> PostFilter {
    let geometry = Arc::new(geometry);
    Arc::new(move |bbox: &BoundingBox| {
        let tile = Rect::new(
            coord! { x: bbox.west, y: bbox.south },
            coord! { x: bbox.east, y: bbox.north },
        )
        .to_polygon();
        geometry.relate(&Geometry::Polygon(tile)).is_contains()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn rect(west: f64, south: f64, east: f64, north: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: west, y: south),
            (x: east, y: south),
            (x: east, y: north),
            (x: west, y: north),
            (x: west, y: south),
        ])
    }

    #[test]
    fn test_zoom_filter() {
        let filter = zoom_filter(12);
        assert!(filter("12/2048/1361"));
        assert!(!filter("1/2/12"));
        assert!(!filter("garbage"));
    }

    #[test]
    fn test_bbox_filter_is_inclusive() {
        let filter = bbox_filter([0.0, -90.0, 180.0, 90.0]);
        assert!(filter(&BoundingBox::new(0.0, -85.0, 180.0, 85.0)));
        assert!(!filter(&BoundingBox::new(-1.0, -85.0, 0.0, 85.0)));
    }

    #[test]
    fn test_geometry_filter_contains() {
        let filter = geometry_filter(rect(0.0, 0.0, 180.0, 90.0));
        assert!(filter(&BoundingBox::new(10.0, 10.0, 20.0, 20.0)));
        assert!(filter(&BoundingBox::new(0.0, 0.0, 180.0, 85.0)));
        assert!(!filter(&BoundingBox::new(-10.0, 10.0, 20.0, 20.0)));
        assert!(!filter(&BoundingBox::new(170.0, -5.0, 175.0, 5.0)));
    }

    #[test]
    fn test_geometry_filter_outside() {
        let filter = geometry_filter(rect(1.0, 2.0, 3.0, 4.0));
        assert!(!filter(&BoundingBox::new(0.0, 0.0, 180.0, 85.0)));
    }
}
