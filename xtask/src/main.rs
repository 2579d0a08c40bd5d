//! Build automation tasks for osmsync
//!
//! - Generating the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for osmsync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<osmsync::Cli>();

    let content = format!(
        r#"# osmsync CLI Reference

This documentation is generated from the CLI source code. Last updated: {}.

## Overview

osmsync keeps osm2pgsql databases in sync with an OSM replication feed. A
project lives under a key prefix of an S3 bucket: its `state.txt` holds the
last applied sequence number and its lua styles are fetched from there on
startup.

## Quick Start

```bash
# Import a full dump into an empty database
osmsync create -p my-project -l roads.lua -t dump-server -s https://dumps.example.com

# Apply every pending minutely diff, shipping expired tiles to the bucket
osmsync append -p my-project -c entities.json \
  -r https://planet.openstreetmap.org/replication/minute -u s3

# Keep polling, pushing tile requests to a pg-boss queue
osmsync append -p my-project -c entities.json \
  -r https://planet.openstreetmap.org/replication/minute \
  -u queue --queue-name tiles --queue-min-zoom 0 --queue-max-zoom 18 --forever
```

## Commands

{}

## Environment Variables

- `S3_ENDPOINT`, `S3_BUCKET`, `S3_REGION`, `S3_ACL` - Object store settings
- `PGHOST`, `PGUSER`, `PGDATABASE` and friends - Target database, read by osm2pgsql itself
- `PGBOSS_DATABASE_URL`, `PGBOSS_SCHEMA` - Database of the tile request queue
- `OSMSYNC_LOCK_DATABASE_URL` - Enables the per-project advisory lock
- `OSMSYNC_WORK_DIR` - Where diffs, styles and expire lists are written
- `OSMSYNC_LOG_LEVEL`, `OSMSYNC_LOG_OUTPUT`, `OSMSYNC_LOG_FORMAT` - Logging

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
