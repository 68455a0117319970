use std::io;
use std::time::Duration;
use thiserror::Error;

// Import module-level errors for AppError
use crate::config::settings::ConfigError;
use crate::hook::HookError;
use crate::repository::RepositoryError;
use crate::repository::clone::CloneError;
use crate::security::command::CommandError;

/// Errors that can occur while running the git executable
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Failed to execute git: {0}")]
    SpawnFailed(#[source] io::Error),

    #[error("Command 'git {command}' failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command 'git {command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Failed to parse git output: {0}")]
    ParseError(String),

    #[error("Git version {0} is too old. Minimum required: 2.20")]
    GitVersionTooOld(String),

    #[error("Failed to detect git version: {0}")]
    GitVersionDetectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl GitError {
    /// Captured stderr (falling back to stdout) of a failed command, or the
    /// error message for anything that never produced output.
    pub fn output(&self) -> String {
        match self {
            GitError::CommandFailed { stdout, stderr, .. } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.to_string()
                }
            }
            other => other.to_string(),
        }
    }
}

/// Top-level application error that wraps all module-specific errors
///
/// This provides a unified error type for the listener binary and embedders
/// while preserving the specific error context from each module. All module
/// errors automatically convert to AppError via the `From` trait.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Working clone error: {0}")]
    Clone(#[from] CloneError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for git operations
pub type GitResult<T> = std::result::Result<T, GitError>;

/// Result type for application-level operations
pub type AppResult<T> = std::result::Result<T, AppError>;
