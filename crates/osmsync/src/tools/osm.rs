use super::{AppendArgs, ChildRegistry, ToolRunner};
use crate::config::{Osm2pgsqlConfig, OsmiumConfig};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Executable {
    Osm2pgsql,
    Osmium,
}

impl Executable {
    fn name(self) -> &'static str {
        match self {
            Executable::Osm2pgsql => "osm2pgsql",
            Executable::Osmium => "osmium",
        }
    }

    fn error(self, exit_code: Option<i32>, stderr: String) -> SyncError {
        match self {
            Executable::Osm2pgsql => SyncError::Osm2pgsql { exit_code, stderr },
            Executable::Osmium => SyncError::Osmium { exit_code, stderr },
        }
    }
}

/// Flags passed to every osm2pgsql invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Osm2pgsqlFlags(Vec<String>);

impl Osm2pgsqlFlags {
    pub fn from_config(config: &Osm2pgsqlConfig) -> Self {
        let mut flags = Vec::new();

        if config.slim {
            flags.push("--slim".to_string());
        }
        flags.push(format!("--cache={}", config.cache_mb));
        flags.push(format!("--number-processes={}", config.processes));
        flags.push(format!("--output={}", config.output));
        flags.push(format!("--log-level={}", config.log_level));
        flags.push(format!("--log-progress={}", config.log_progress));
        if let Some(schema) = &config.middle_schema {
            flags.push(format!("--middle-schema={}", schema));
        }
        if let Some(schema) = &config.schema {
            flags.push(format!("--schema={}", schema));
        }

        Self(flags)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Flags passed to every osmium invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsmiumFlags(Vec<String>);

impl OsmiumFlags {
    pub fn from_config(config: &OsmiumConfig) -> Self {
        let mut flags = Vec::new();

        if config.verbose {
            flags.push("--verbose".to_string());
        }
        flags.push(if config.progress { "--progress" } else { "--no-progress" }.to_string());
        flags.push("--simplify".to_string());

        Self(flags)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

/// Runs osm2pgsql and osmium with flags assembled once from configuration
pub struct OsmCommandRunner {
    osm2pgsql_path: PathBuf,
    osmium_path: PathBuf,
    osm2pgsql_flags: Osm2pgsqlFlags,
    osmium_flags: OsmiumFlags,
    children: ChildRegistry,
}

impl OsmCommandRunner {
    pub fn new(osm2pgsql: &Osm2pgsqlConfig, osmium: &OsmiumConfig) -> Self {
        Self {
            osm2pgsql_path: osm2pgsql.path.clone(),
            osmium_path: osmium.path.clone(),
            osm2pgsql_flags: Osm2pgsqlFlags::from_config(osm2pgsql),
            osmium_flags: OsmiumFlags::from_config(osmium),
            children: ChildRegistry::new(),
        }
    }

    pub fn children(&self) -> &ChildRegistry {
        &self.children
    }

    fn command_line(&self, executable: Executable, command: &str, args: Vec<String>) -> Vec<String> {
        let flags = match executable {
            Executable::Osm2pgsql => self.osm2pgsql_flags.as_slice(),
            Executable::Osmium => self.osmium_flags.as_slice(),
        };

        let mut full = Vec::with_capacity(1 + flags.len() + args.len());
        full.push(command.to_string());
        full.extend(flags.iter().cloned());
        full.extend(args);
        full
    }

    async fn execute(&self, executable: Executable, command: &str, args: Vec<String>) -> SyncResult<()> {
        let program = match executable {
            Executable::Osm2pgsql => &self.osm2pgsql_path,
            Executable::Osmium => &self.osmium_path,
        };
        let args = self.command_line(executable, command, args);

        info!(executable = executable.name(), command, ?args, "Executing osm command");

        let output = self
            .children
            .run(program, &args)
            .await
            .map_err(|err| executable.error(None, err.to_string()))?;

        if !output.success() {
            error!(
                executable = executable.name(),
                command,
                exit_code = ?output.exit_code,
                "osm command failed"
            );
            return Err(executable.error(output.exit_code, output.stderr));
        }

        Ok(())
    }
}

#[async_trait]
impl ToolRunner for OsmCommandRunner {
    async fn merge_changes(&self, input: &Path, output: &Path) -> SyncResult<()> {
        let args = vec![
            input.display().to_string(),
            format!("--output={}", output.display()),
            "--overwrite".to_string(),
        ];
        self.execute(Executable::Osmium, "merge-changes", args).await
    }

    async fn append(&self, args: &AppendArgs) -> SyncResult<()> {
        self.execute(Executable::Osm2pgsql, "--append", args.to_args())
            .await
    }

    async fn create(&self, style: &Path, dump: &Path) -> SyncResult<()> {
        let args = vec![format!("--style={}", style.display()), dump.display().to_string()];
        self.execute(Executable::Osm2pgsql, "--create", args).await
    }

    fn terminate_all(&self) {
        self.children.terminate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_osm2pgsql_flags_from_defaults() {
        let config = Config::default();
        let flags = Osm2pgsqlFlags::from_config(&config.osm2pgsql);
        assert_eq!(
            flags.as_slice(),
            [
                "--cache=2500",
                "--number-processes=2",
                "--output=flex",
                "--log-level=info",
                "--log-progress=false",
            ]
        );
    }

    #[test]
    fn test_osm2pgsql_flags_with_slim_and_schemas() {
        let mut config = Config::default().osm2pgsql;
        config.slim = true;
        config.log_progress = true;
        config.middle_schema = Some("middle".to_string());
        config.schema = Some("osm".to_string());

        let flags = Osm2pgsqlFlags::from_config(&config);
        assert_eq!(flags.as_slice().first().map(String::as_str), Some("--slim"));
        assert!(flags.as_slice().contains(&"--log-progress=true".to_string()));
        assert!(flags.as_slice().contains(&"--middle-schema=middle".to_string()));
        assert!(flags.as_slice().contains(&"--schema=osm".to_string()));
    }

    #[test]
    fn test_osmium_flags() {
        let mut config = Config::default().osmium;
        assert_eq!(OsmiumFlags::from_config(&config).as_slice(), ["--no-progress", "--simplify"]);

        config.verbose = true;
        config.progress = true;
        assert_eq!(
            OsmiumFlags::from_config(&config).as_slice(),
            ["--verbose", "--progress", "--simplify"]
        );
    }

    #[test]
    fn test_command_line_puts_command_first() {
        let config = Config::default();
        let runner = OsmCommandRunner::new(&config.osm2pgsql, &config.osmium);
        let line = runner.command_line(
            Executable::Osmium,
            "merge-changes",
            vec!["in.osc.gz".to_string(), "--output=out.osc.gz".to_string()],
        );
        assert_eq!(
            line,
            ["merge-changes", "--no-progress", "--simplify", "in.osc.gz", "--output=out.osc.gz"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_maps_to_tool_error() {
        let mut config = Config::default();
        config.osmium.path = PathBuf::from("/nonexistent/osmium");
        let runner = OsmCommandRunner::new(&config.osm2pgsql, &config.osmium);

        let result = runner
            .merge_changes(Path::new("in.osc.gz"), Path::new("out.osc.gz"))
            .await;
        assert!(matches!(result, Err(SyncError::Osmium { exit_code: None, .. })));
    }
}
