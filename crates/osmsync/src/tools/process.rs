use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Exit status and captured stderr of a finished child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the child was killed by a signal
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Process groups of children that are still running
#[derive(Clone, Default)]
pub struct ChildRegistry {
    groups: Arc<Mutex<HashSet<u32>>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn groups(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.groups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, pid: u32) {
        self.groups().insert(pid);
    }

    fn unregister(&self, pid: u32) {
        self.groups().remove(&pid);
    }

    pub fn running(&self) -> usize {
        self.groups().len()
    }

    /// SIGKILL every registered process group
    pub fn terminate_all(&self) {
        let groups: Vec<u32> = self.groups().drain().collect();

        for pid in groups {
            warn!(pid, "Terminating child process group");
            kill_group(pid);
        }
    }

    /// Spawn `program`, stream its output to the log and wait for it.
    ///
    /// Only spawn and pipe failures surface as errors; a non-zero exit is
    /// reported through [`CommandOutput::exit_code`].
    pub async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.register(pid);
        }

        let executable = program.display().to_string();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, stderr, status) = tokio::join!(
            forward_lines(stdout, &executable, false),
            forward_lines(stderr, &executable, true),
            child.wait()
        );

        if let Some(pid) = pid {
            self.unregister(pid);
        }

        let status = status?;

        Ok(CommandOutput {
            exit_code: status.code(),
            stderr: stderr.join("\n"),
        })
    }
}

/// Log each line of a child stream, returning stderr lines for error payloads
async fn forward_lines<R>(stream: Option<R>, executable: &str, capture: bool) -> Vec<String>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let Some(stream) = stream else {
        return captured;
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if capture {
                    info!(executable, "{}", line);
                    captured.push(line);
                } else {
                    debug!(executable, "{}", line);
                }
            },
            Ok(None) => break,
            Err(err) => {
                warn!(executable, error = %err, "Failed to read child output");
                break;
            },
        }
    }

    captured
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {},
        Err(err) => warn!(pid, error = %err, "Failed to kill child process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(pid: u32) {
    warn!(pid, "Process group termination is only supported on unix");
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_captures_stderr_and_exit_code() {
        let registry = ChildRegistry::new();
        let output = registry
            .run(
                Path::new("sh"),
                &["-c".to_string(), "echo out; echo broken >&2; exit 3".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stderr, "broken");
        assert_eq!(registry.running(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_io_error() {
        let registry = ChildRegistry::new();
        let result = registry.run(Path::new("/nonexistent/osmium"), &[]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_terminate_all_kills_running_children() {
        let registry = ChildRegistry::new();
        let runner = registry.clone();
        let handle = tokio::spawn(async move {
            runner
                .run(Path::new("sh"), &["-c".to_string(), "sleep 30".to_string()])
                .await
        });

        for _ in 0..50 {
            if registry.running() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registry.running(), 1);

        registry.terminate_all();
        let output = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(output.exit_code, None);
        assert!(!output.success());
    }
}
