use crate::error::{GitError, GitResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Result of executing a git command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

/// Executes git commands inside a working directory
///
/// Arguments are handed to the process as a list, never through a shell, so
/// commit messages and branch names need no quoting. Commands run on the
/// tokio process driver; with a timeout set, a command still running when it
/// expires is killed.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    work_dir: PathBuf,
    envs: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl GitExecutor {
    /// Create a new GitExecutor rooted at the given directory
    pub fn new<P: AsRef<Path>>(work_dir: P) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
            envs: Vec::new(),
            timeout: None,
        }
    }

    /// Add an environment variable to every command run by this executor
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Kill any command that runs longer than `timeout`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `git <args>` and return the output, failing on a non-zero exit
    ///
    /// Example: `executor.run(["checkout", "-b", "feature"]).await`
    pub async fn run<I, S>(&self, args: I) -> GitResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<S> = args.into_iter().collect();
        let command_line = args
            .iter()
            .map(|a| a.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");

        if args.is_empty() {
            return Err(GitError::ParseError("Empty command".to_string()));
        }

        debug!(command = %command_line, dir = %self.work_dir.display(), "running git");

        let mut cmd = Command::new("git");
        cmd.args(&args)
            .current_dir(&self.work_dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    warn!(command = %command_line, ?limit, "git timed out, killed");
                    return Err(GitError::Timeout {
                        command: command_line,
                        timeout: limit,
                    });
                }
            },
            None => cmd.output().await,
        }
        .map_err(GitError::SpawnFailed)?;

        Self::process_output(output, command_line)
    }

    /// Process command output into CommandOutput struct
    fn process_output(output: Output, command: String) -> GitResult<CommandOutput> {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);
        let success = output.status.success();

        if !success {
            return Err(GitError::CommandFailed {
                command,
                exit_code,
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            success,
        })
    }

    /// Get the working directory
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn create_test_repo() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let repo_path = temp_dir.path().to_path_buf();

        std::process::Command::new("git")
            .args(["init"])
            .current_dir(&repo_path)
            .output()
            .unwrap();

        (temp_dir, repo_path)
    }

    #[tokio::test]
    async fn test_run_status() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let output = executor.run(["status", "--porcelain"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_failed_command_captures_stderr() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        // No commits yet, so there is nothing to log
        let err = executor.run(["log", "--oneline"]).await.unwrap_err();
        match &err {
            GitError::CommandFailed { exit_code, stderr, .. } => {
                assert_ne!(*exit_code, 0);
                assert!(!stderr.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.output().is_empty());
    }

    #[tokio::test]
    async fn test_arguments_are_not_shell_interpreted() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        // A shell would expand this; git just sees an unknown branch name
        let result = executor.run(["checkout", "$(whoami)"]).await;
        assert!(matches!(result, Err(GitError::CommandFailed { .. })));
    }

    #[tokio::test]
    async fn test_environment_is_forwarded() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path)
            .env("GIT_AUTHOR_NAME", "Env Author")
            .env("GIT_AUTHOR_EMAIL", "env@example.com");

        let output = executor.run(["var", "GIT_AUTHOR_IDENT"]).await.unwrap();
        assert!(output.stdout.starts_with("Env Author"));
    }

    #[tokio::test]
    async fn test_command_line_is_reported_on_failure() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let err = executor.run(["log", "--oneline"]).await.unwrap_err();
        assert!(matches!(
            err,
            GitError::CommandFailed { ref command, .. } if command == "log --oneline"
        ));
    }

    #[tokio::test]
    async fn test_slow_command_is_killed_at_timeout() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path).timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = executor
            .run(["-c", "alias.nap=!sleep 10", "nap"])
            .await
            .unwrap_err();

        assert!(matches!(err, GitError::Timeout { .. }), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.output().contains("timed out"));
    }

    #[tokio::test]
    async fn test_fast_command_within_timeout() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path).timeout(Duration::from_secs(30));

        assert!(executor.run(["status"]).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_command() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        let result = executor.run(Vec::<&str>::new()).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_work_dir() {
        let (_temp, repo_path) = create_test_repo();
        let executor = GitExecutor::new(&repo_path);

        assert_eq!(executor.work_dir(), repo_path.as_path());
    }
}
