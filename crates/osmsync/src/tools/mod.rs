//! External tool invocation
//!
//! Diffs are merged with `osmium merge-changes` and applied with
//! `osm2pgsql`. Both run as child processes in their own process groups so a
//! failed cycle can kill everything it started.

use crate::error::SyncResult;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

mod osm;
mod process;

pub use osm::{OsmCommandRunner, Osm2pgsqlFlags, OsmiumFlags};
pub use process::{ChildRegistry, CommandOutput};

/// Format an expire-tiles zoom range, `"N"` or `"min-max"`
pub fn zoom_range(min: u8, max: Option<u8>) -> String {
    match max {
        Some(max) if max != min => format!("{}-{}", min, max),
        _ => min.to_string(),
    }
}

/// Per-entity arguments of an `osm2pgsql --append` run
#[derive(Debug, Clone, PartialEq)]
pub struct AppendArgs {
    pub style: PathBuf,
    pub expire_tiles: Option<String>,
    pub expire_output: Option<PathBuf>,
    pub diff: PathBuf,
}

impl AppendArgs {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![format!("--style={}", self.style.display())];

        if let Some(range) = &self.expire_tiles {
            args.push(format!("--expire-tiles={}", range));
        }

        if let Some(output) = &self.expire_output {
            args.push(format!("--expire-output={}", output.display()));
        }

        args.push(self.diff.display().to_string());
        args
    }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Merge and simplify a change file into `output`
    async fn merge_changes(&self, input: &Path, output: &Path) -> SyncResult<()>;

    async fn append(&self, args: &AppendArgs) -> SyncResult<()>;

    /// Import a full dump into an empty database
    async fn create(&self, style: &Path, dump: &Path) -> SyncResult<()>;

    /// Kill every child process still running
    fn terminate_all(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zoom_range() {
        assert_eq!(zoom_range(16, None), "16");
        assert_eq!(zoom_range(1, Some(18)), "1-18");
        assert_eq!(zoom_range(12, Some(12)), "12");
    }

    #[test]
    fn test_append_args_order() {
        let args = AppendArgs {
            style: PathBuf::from("/tmp/p/buildings.lua"),
            expire_tiles: Some("1-18".to_string()),
            expire_output: Some(PathBuf::from("/tmp/p/buildings.42.expire.list")),
            diff: PathBuf::from("/tmp/42.simplified.osc.gz"),
        };

        assert_eq!(
            args.to_args(),
            vec![
                "--style=/tmp/p/buildings.lua",
                "--expire-tiles=1-18",
                "--expire-output=/tmp/p/buildings.42.expire.list",
                "/tmp/42.simplified.osc.gz",
            ]
        );
    }

    #[test]
    fn test_append_args_without_expiry() {
        let args = AppendArgs {
            style: PathBuf::from("style.lua"),
            expire_tiles: None,
            expire_output: None,
            diff: PathBuf::from("diff.osc.gz"),
        };
        assert_eq!(args.to_args(), vec!["--style=style.lua", "diff.osc.gz"]);
    }
}
