//! osmsync library
//!
//! Keeps osm2pgsql databases in sync with an OSM replication feed.
//!
//! # Overview
//!
//! - **Append**: apply replication diffs to every entity of a project and
//!   advance the project's sequence number (`osmsync append`)
//! - **Create**: import a full dump into an empty database (`osmsync create`)
//! - **Expired tiles**: compact osm2pgsql's expire lists into bounding boxes
//!   and ship them to the object store and/or a pg-boss queue

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod append;
pub mod config;
pub mod create;
pub mod error;
pub mod lock;
pub mod queue;
pub mod replication;
pub mod resources;
pub mod state;
pub mod storage;
pub mod tiles;
pub mod tools;
pub mod upload;

pub use append::{AppendDependencies, AppendEntity, AppendManager, AppendOptions, CycleOutcome};
pub use config::Config;
pub use create::{CreateManager, DumpSource, DumpSourceType};
pub use error::{SyncError, SyncResult};
pub use upload::UploadTarget;

use clap::{Args, Parser, Subcommand};
use queue::{QueueSettings, MAX_QUEUE_ZOOM};
use std::path::PathBuf;
use storage::ObjectAcl;

/// osmsync - OSM replication for osm2pgsql databases
#[derive(Parser, Debug)]
#[command(name = "osmsync")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply replication diffs to an existing project
    Append(AppendCommand),

    /// Initialize a database from scratch out of an osm pbf dump
    Create(CreateCommand),
}

#[derive(Args, Debug, Clone)]
pub struct AppendCommand {
    /// Project id, the key prefix of the project's objects in the bucket
    #[arg(short, long, env = "S3_PROJECT_ID")]
    pub project_id: String,

    /// Path of the append entities configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Root url of the replication feed
    #[arg(short, long, env = "REPLICATION_URL")]
    pub replication_url: String,

    /// Where expired tiles are uploaded
    #[arg(short, long, value_enum, value_delimiter = ',', num_args = 1..)]
    pub upload_targets: Vec<UploadTarget>,

    /// Queue receiving tile requests, required by the queue target
    #[arg(long)]
    pub queue_name: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_QUEUE_ZOOM)))]
    pub queue_min_zoom: Option<u8>,

    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_QUEUE_ZOOM)))]
    pub queue_max_zoom: Option<u8>,

    /// Maximum number of diffs to apply in this run
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Keep running and poll the feed for new diffs
    #[arg(short, long)]
    pub forever: bool,

    /// Seconds to wait between polls when up to date or after a failure
    #[arg(short, long, default_value_t = 60)]
    pub wait_time_seconds: u64,

    /// Canned ACL of uploaded objects
    #[arg(short = 'a', long, env = "S3_ACL")]
    pub s3_acl: Option<ObjectAcl>,
}

impl AppendCommand {
    /// Queue settings when the queue target is selected
    pub fn queue_settings(&self) -> SyncResult<Option<QueueSettings>> {
        if !self.upload_targets.contains(&UploadTarget::Queue) {
            return Ok(None);
        }

        match (&self.queue_name, self.queue_min_zoom, self.queue_max_zoom) {
            (Some(name), Some(min), Some(max)) => QueueSettings::new(name.clone(), min, max).map(Some),
            _ => Err(SyncError::config(
                "the queue upload target requires --queue-name, --queue-min-zoom and --queue-max-zoom",
            )),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CreateCommand {
    /// Project id, the key prefix of the project's objects in the bucket
    #[arg(short, long, env = "S3_PROJECT_ID")]
    pub project_id: String,

    /// Key of the lua style relative to the project prefix
    #[arg(short = 'l', long)]
    pub script_key: String,

    /// Local path, url or dump server url, depending on the source type
    #[arg(short = 's', long)]
    pub dump_source: String,

    #[arg(short = 't', long, value_enum)]
    pub dump_source_type: DumpSourceType,

    /// Extra dump server request headers as key=value
    #[arg(long, num_args = 0..)]
    pub dump_server_headers: Vec<String>,
}
