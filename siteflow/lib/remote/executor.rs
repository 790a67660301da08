use std::{
    sync::{Arc, Mutex as StdMutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use tokio::{io::AsyncWriteExt, sync::Semaphore};

use crate::{
    config::RemoteConfig,
    utils::{remote_parent, shell_quote},
    SiteflowError, SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a completed remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output, trimmed.
    pub stdout: String,
    /// Captured standard error, trimmed.
    pub stderr: String,
    /// Exit code the remote shell reported.
    pub exit_code: i32,
    /// Wall-clock duration of the invocation.
    pub duration: Duration,
}

/// The seam between siteflow and the managed host.
///
/// Production code talks to [`SshExecutor`]; tests substitute a scripted
/// implementation. Only [`run`](Remote::run) and
/// [`run_with_stdin`](Remote::run_with_stdin) touch the wire; the file and
/// directory helpers are shaped on top of them.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Runs a single shell invocation with the given deadline.
    ///
    /// A non-zero exit code is NOT an error here; callers that require
    /// success use [`run_checked`](Remote::run_checked).
    async fn run(&self, cmd: &str, timeout: Duration) -> SiteflowResult<CommandOutput>;

    /// Runs a command with bytes piped to its standard input.
    async fn run_with_stdin(
        &self,
        cmd: &str,
        stdin: &[u8],
        timeout: Duration,
    ) -> SiteflowResult<CommandOutput>;

    /// Runs a command and maps a non-zero exit code to
    /// [`SiteflowError::CommandFailure`].
    async fn run_checked(&self, cmd: &str, timeout: Duration) -> SiteflowResult<CommandOutput> {
        let output = self.run(cmd, timeout).await?;
        if output.exit_code != 0 {
            return Err(SiteflowError::CommandFailure {
                command: cmd.to_string(),
                exit_code: output.exit_code,
                stderr: if output.stderr.is_empty() {
                    output.stdout
                } else {
                    output.stderr
                },
            });
        }
        Ok(output)
    }

    /// Reads a remote file, mapping a missing file to `NotFound`.
    async fn read_file(&self, path: &str) -> SiteflowResult<String> {
        let cmd = format!("cat {}", shell_quote(path));
        let output = self.run(&cmd, crate::config::DEFAULT_COMMAND_TIMEOUT).await?;
        if output.exit_code != 0 {
            if output.stderr.contains("No such file") {
                return Err(SiteflowError::NotFound(format!("remote file {path}")));
            }
            return Err(SiteflowError::CommandFailure {
                command: cmd,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    /// Writes bytes to a remote file, creating parent directories.
    async fn upload(&self, path: &str, bytes: &[u8]) -> SiteflowResult<()> {
        let mkdir = remote_parent(path)
            .map(|parent| format!("mkdir -p {} && ", shell_quote(parent)))
            .unwrap_or_default();
        let cmd = format!("{mkdir}cat > {}", shell_quote(path));
        self.run_with_stdin(&cmd, bytes, crate::config::UPLOAD_TIMEOUT)
            .await
            .and_then(|output| {
                if output.exit_code != 0 {
                    Err(SiteflowError::CommandFailure {
                        command: cmd,
                        exit_code: output.exit_code,
                        stderr: output.stderr,
                    })
                } else {
                    Ok(())
                }
            })
    }

    /// Lists the immediate child directories of a remote path, sorted.
    async fn list_directories(&self, path: &str) -> SiteflowResult<Vec<String>> {
        let cmd = format!(
            "find {} -mindepth 1 -maxdepth 1 -type d -printf '%f\\n' | sort",
            shell_quote(path)
        );
        let output = self
            .run_checked(&cmd, crate::config::DEFAULT_COMMAND_TIMEOUT)
            .await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// A bounded pool of authenticated SSH sessions to the managed host.
///
/// Sessions are acquired under a semaphore sized by `remote.pool_size`.
/// A session that sees a transport error or times out is discarded rather
/// than returned; idle sessions are closed after the configured grace.
pub struct SshExecutor {
    config: RemoteConfig,
    semaphore: Arc<Semaphore>,
    idle: StdMutex<Vec<IdleSession>>,
}

struct IdleSession {
    session: Session,
    since: Instant,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SshExecutor {
    /// Creates a pool for the configured host. No connection is made until
    /// the first command runs.
    pub fn new(config: RemoteConfig) -> Self {
        let permits = config.pool_size.max(1);
        Self {
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            idle: StdMutex::new(Vec::new()),
        }
    }

    async fn connect(&self) -> SiteflowResult<Session> {
        let mut builder = SessionBuilder::default();
        builder
            .user(self.config.user.clone())
            .port(self.config.port)
            .known_hosts_check(KnownHosts::Strict)
            .connect_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .server_alive_interval(Duration::from_secs(30));
        if let Some(key_path) = &self.config.key_path {
            builder.keyfile(key_path);
        }

        builder
            .connect(&self.config.host)
            .await
            .map_err(|e| SiteflowError::Transport(format!("ssh connect failed: {e}")))
    }

    /// Takes a session from the pool, reaping expired idle sessions, or
    /// connects a fresh one.
    async fn checkout(&self) -> SiteflowResult<Session> {
        let grace = Duration::from_secs(self.config.idle_grace_secs);
        let reusable = {
            let mut idle = self.idle.lock().expect("idle session list poisoned");
            let mut reusable = None;
            while let Some(entry) = idle.pop() {
                if entry.since.elapsed() > grace {
                    tokio::spawn(async move {
                        let _ = entry.session.close().await;
                    });
                } else {
                    reusable = Some(entry.session);
                    break;
                }
            }
            reusable
        };

        match reusable {
            Some(session) => Ok(session),
            None => self.connect().await,
        }
    }

    fn checkin(&self, session: Session) {
        let mut idle = self.idle.lock().expect("idle session list poisoned");
        idle.push(IdleSession {
            session,
            since: Instant::now(),
        });
    }

    async fn execute_once(
        &self,
        cmd: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> SiteflowResult<CommandOutput> {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SiteflowError::Transport("session pool closed".to_string()))?;

        let session = self.checkout().await?;
        let started = Instant::now();

        let result = tokio::time::timeout(timeout, run_on_session(&session, cmd, stdin)).await;

        match result {
            Result::Ok(Result::Ok(output)) => {
                self.checkin(session);
                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                    duration: started.elapsed(),
                })
            }
            Result::Ok(Result::Err(e)) => {
                // The session is suspect; close it instead of pooling it.
                tokio::spawn(async move {
                    let _ = session.close().await;
                });
                Err(SiteflowError::Transport(format!("ssh exec failed: {e}")))
            }
            Result::Err(_) => {
                tokio::spawn(async move {
                    let _ = session.close().await;
                });
                Err(SiteflowError::Timeout(timeout.as_secs(), cmd.to_string()))
            }
        }
    }
}

async fn run_on_session(
    session: &Session,
    cmd: &str,
    stdin: Option<&[u8]>,
) -> Result<std::process::Output, String> {
    match stdin {
        None => session.shell(cmd).output().await.map_err(|e| e.to_string()),
        Some(bytes) => {
            let mut child = session
                .shell(cmd)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .await
                .map_err(|e| e.to_string())?;
            if let Some(mut handle) = child.stdin().take() {
                handle.write_all(bytes).await.map_err(|e| e.to_string())?;
                handle.shutdown().await.map_err(|e| e.to_string())?;
            }
            child.wait_with_output().await.map_err(|e| e.to_string())
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Remote for SshExecutor {
    async fn run(&self, cmd: &str, timeout: Duration) -> SiteflowResult<CommandOutput> {
        tracing::debug!(cmd, "ssh exec");
        match self.execute_once(cmd, None, timeout).await {
            Err(e) if e.is_transient() => {
                // A transport failure means the command never started, so a
                // single retry on a fresh session is safe for any command.
                tracing::warn!(cmd, error = %e, "ssh exec failed, retrying once");
                self.execute_once(cmd, None, timeout).await
            }
            other => other,
        }
    }

    async fn run_with_stdin(
        &self,
        cmd: &str,
        stdin: &[u8],
        timeout: Duration,
    ) -> SiteflowResult<CommandOutput> {
        tracing::debug!(cmd, bytes = stdin.len(), "ssh exec with stdin");
        // Stdin may have been partially consumed; never retried.
        self.execute_once(cmd, Some(stdin), timeout).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    /// A scripted Remote whose `run` pops canned outputs.
    struct ScriptedRemote {
        outputs: Mutex<Vec<SiteflowResult<CommandOutput>>>,
        commands: Mutex<Vec<String>>,
    }

    impl ScriptedRemote {
        fn new(outputs: Vec<SiteflowResult<CommandOutput>>) -> Self {
            Self {
                outputs: Mutex::new(outputs),
                commands: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Remote for ScriptedRemote {
        async fn run(&self, cmd: &str, _timeout: Duration) -> SiteflowResult<CommandOutput> {
            self.commands.lock().unwrap().push(cmd.to_string());
            self.outputs.lock().unwrap().remove(0)
        }

        async fn run_with_stdin(
            &self,
            cmd: &str,
            _stdin: &[u8],
            _timeout: Duration,
        ) -> SiteflowResult<CommandOutput> {
            self.commands.lock().unwrap().push(cmd.to_string());
            self.outputs.lock().unwrap().remove(0)
        }
    }

    fn ok_output(stdout: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            duration: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_run_checked_maps_nonzero_exit() {
        let remote = ScriptedRemote::new(vec![Ok(CommandOutput {
            stdout: String::new(),
            stderr: "boom".to_string(),
            exit_code: 2,
            duration: Duration::from_millis(1),
        })]);
        let err = remote
            .run_checked("false", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            SiteflowError::CommandFailure { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_file_maps_missing_to_not_found() {
        let remote = ScriptedRemote::new(vec![Ok(CommandOutput {
            stdout: String::new(),
            stderr: "cat: /opt/sites/x/.env: No such file or directory".to_string(),
            exit_code: 1,
            duration: Duration::from_millis(1),
        })]);
        let err = remote.read_file("/opt/sites/x/.env").await.unwrap_err();
        assert!(matches!(err, SiteflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_directories_splits_and_filters() {
        let remote = ScriptedRemote::new(vec![Ok(ok_output("alpha\nbeta\n\n", 0))]);
        let dirs = remote.list_directories("/opt/sites").await.unwrap();
        assert_eq!(dirs, vec!["alpha", "beta"]);
        let commands = remote.commands.lock().unwrap();
        assert!(commands[0].contains("-maxdepth 1"));
    }

    #[tokio::test]
    async fn test_upload_shapes_mkdir_and_cat() {
        let remote = ScriptedRemote::new(vec![Ok(ok_output("", 0))]);
        remote.upload("/opt/sites/blog/.env", b"DOMAIN=x\n").await.unwrap();
        let commands = remote.commands.lock().unwrap();
        assert_eq!(
            commands[0],
            "mkdir -p /opt/sites/blog && cat > /opt/sites/blog/.env"
        );
    }
}
