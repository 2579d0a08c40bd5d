use super::filters::{line_zoom, zoom_filter};
use super::{BoundingBox, PostFilter, PreFilter, Tile};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Direction the raw lines are sorted in before compaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// y step between consecutive tiles of one run
    fn step(self) -> i64 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

#[derive(Clone, Default)]
pub struct ParserOptions {
    pub sort: SortOrder,
    /// Keep only the deepest zoom present in the list
    pub filter_max_zoom: bool,
    pub pre_filters: Vec<PreFilter>,
    pub post_filters: Vec<PostFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub boxes: Vec<BoundingBox>,
    /// Includes the injected max zoom filter
    pub pre_filters_applied: usize,
    pub post_filters_applied: usize,
}

struct Run {
    first: (Tile, BoundingBox),
    last: (Tile, BoundingBox),
}

/// Compacts expire lists into bounding boxes.
///
/// Lines are sorted as text, not numerically, so `9/..` sorts after `10/..`.
/// Consumers of the produced boxes rely on this ordering. A run continues
/// while z and x stay equal and y moves by one step in the sort direction.
pub struct ExpireTilesParser {
    options: ParserOptions,
}

impl ExpireTilesParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> ParseOutcome {
        let sort = self.options.sort;

        let mut sorted: Vec<&str> = lines.iter().map(|line| line.as_ref()).collect();
        sorted.sort_unstable();
        if sort == SortOrder::Desc {
            sorted.reverse();
        }

        let mut pre_filters = self.options.pre_filters.clone();
        if self.options.filter_max_zoom {
            // the "max" zoom is that of the head line in text order, so a
            // list holding both 9 and 10 keeps zoom 9
            let head = match sort {
                SortOrder::Desc => sorted.first(),
                SortOrder::Asc => sorted.last(),
            };
            let max_zoom = head.and_then(|line| line_zoom(line)).unwrap_or_default();
            pre_filters.push(zoom_filter(max_zoom));
        }

        let post_filters = &self.options.post_filters;

        let tiles = sorted
            .into_iter()
            .filter(|line| pre_filters.iter().all(|filter| filter(line)))
            .filter_map(|line| match line.parse::<Tile>() {
                Ok(tile) => Some(tile),
                Err(reason) => {
                    warn!(%reason, "Skipping malformed expired tile");
                    None
                },
            })
            .map(|tile| (tile, tile.bbox()))
            .filter(|(_, bbox)| post_filters.iter().all(|filter| filter(bbox)));

        let mut runs: Vec<Run> = Vec::new();
        for (tile, bbox) in tiles {
            if let Some(run) = runs.last_mut() {
                let (last, _) = run.last;
                let continues = last.z == tile.z
                    && last.x == tile.x
                    && i64::from(tile.y) == i64::from(last.y) + sort.step();
                if continues {
                    run.last = (tile, bbox);
                    continue;
                }
            }

            runs.push(Run {
                first: (tile, bbox),
                last: (tile, bbox),
            });
        }

        let boxes = runs
            .into_iter()
            .map(|run| {
                // the southern end of a run is its first tile under desc, its last under asc
                let (bottom, top) = match sort {
                    SortOrder::Desc => (run.first.1, run.last.1),
                    SortOrder::Asc => (run.last.1, run.first.1),
                };
                BoundingBox::new(bottom.west, bottom.south, top.east, top.north)
            })
            .collect();

        ParseOutcome {
            boxes,
            pre_filters_applied: pre_filters.len(),
            post_filters_applied: post_filters.len(),
        }
    }
}
