//! osmsync - Main entry point

use anyhow::Context;
use clap::Parser;
use osmsync::append::load_entities;
use osmsync::error::exit_codes;
use osmsync::lock::{NoopLock, PgAdvisoryLock, ProjectLock};
use osmsync::queue::{PgBossQueueProvider, QueueProvider};
use osmsync::replication::{dump::parse_headers, DumpClient, ReplicationClient};
use osmsync::resources::ObjectStoreResourceProvider;
use osmsync::storage::{ObjectStore, S3Storage};
use osmsync::tools::{OsmCommandRunner, ToolRunner};
use osmsync::{
    AppendCommand, AppendDependencies, AppendManager, AppendOptions, Cli, Commands, Config,
    CreateCommand, CreateManager, DumpSource, SyncError,
};
use osmsync_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("osmsync")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("Warning: ignoring invalid logging environment: {}", e);
            log_config
        },
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    let exit_code = match run(cli).await {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            let exit_code = e
                .downcast_ref::<SyncError>()
                .map_or(exit_codes::GENERAL_ERROR, SyncError::exit_code);
            error!(error = %format!("{:#}", e), exit_code, "Command failed");
            eprintln!("Error: {:#}", e);
            exit_code
        },
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Commands::Append(args) => append(config, args).await,
        Commands::Create(args) => create(config, args).await,
    }
}

async fn append(mut config: Config, args: AppendCommand) -> anyhow::Result<()> {
    if let Some(acl) = args.s3_acl {
        config.storage.acl = acl;
    }

    let queue_settings = args.queue_settings()?;
    let entities = load_entities(&args.config).await?;
    info!(
        project_id = %args.project_id,
        entities = entities.len(),
        limit = ?args.limit,
        "Append configuration loaded"
    );

    let store: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(config.storage.clone()).await?);
    let tools: Arc<dyn ToolRunner> = Arc::new(OsmCommandRunner::new(&config.osm2pgsql, &config.osmium));

    let queue: Option<Arc<dyn QueueProvider>> = match &queue_settings {
        Some(settings) => Some(Arc::new(PgBossQueueProvider::new(&config.queue, &settings.name)?)),
        None => None,
    };

    let lock: Arc<dyn ProjectLock> = match &config.lock.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(2)
                .connect_lazy(url)
                .context("Invalid lock database url")?;
            Arc::new(PgAdvisoryLock::new(pool))
        },
        None => Arc::new(NoopLock),
    };

    let dependencies = AppendDependencies {
        store: store.clone(),
        replication: ReplicationClient::new(&config.http)?,
        tools: tools.clone(),
        resources: Arc::new(ObjectStoreResourceProvider::new(store)),
        queue,
        lock,
    };
    let options = AppendOptions {
        work_dir: config.work_dir.clone(),
        generate_expire_output: config.osm2pgsql.generate_expire_output,
        queue_settings,
    };

    let mut manager = AppendManager::new(dependencies, options)?;
    manager
        .prepare_manager(&args.project_id, entities, args.upload_targets.clone(), args.limit)
        .await?;

    if args.forever {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            trigger.cancel();
        });

        manager
            .append_forever(
                &args.replication_url,
                Duration::from_secs(args.wait_time_seconds),
                shutdown.clone(),
            )
            .await?;

        if shutdown.is_cancelled() {
            return Err(SyncError::Terminated.into());
        }
        return Ok(());
    }

    let result = tokio::select! {
        result = manager.append(&args.replication_url) => result,
        _ = shutdown_signal() => {
            tools.terminate_all();
            Err(SyncError::Terminated)
        },
    };
    manager.stop().await;
    result?;

    info!(project_id = %args.project_id, "Finished executing append successfully");
    Ok(())
}

async fn create(config: Config, args: CreateCommand) -> anyhow::Result<()> {
    let source = DumpSource::new(args.dump_source_type, &args.dump_source)?;
    let headers = parse_headers(&args.dump_server_headers)?;

    let store: Arc<dyn ObjectStore> = Arc::new(S3Storage::new(config.storage.clone()).await?);
    let tools: Arc<dyn ToolRunner> = Arc::new(OsmCommandRunner::new(&config.osm2pgsql, &config.osmium));
    let dumps = DumpClient::new(&config.http, headers)?;

    let manager = CreateManager::new(store, dumps, tools.clone(), config.work_dir.clone());

    tokio::select! {
        result = manager.create(&args.project_id, &args.script_key, &source) => result?,
        _ = shutdown_signal() => {
            warn!("Create interrupted, terminating osm2pgsql");
            tools.terminate_all();
            return Err(SyncError::Terminated.into());
        },
    }

    info!(project_id = %args.project_id, "Finished creating project successfully");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
