use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::security::Access;

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024; // 10MB

/// Append-only record of every git service request seen by the listener
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    /// Create an AuditLogger writing to `path`, creating its directory
    pub fn with_path<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let log_path = path.as_ref().to_path_buf();

        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }

        Ok(Self { log_path })
    }

    /// A command that ran, with git's exit code
    pub fn log_command(
        &self,
        user: &str,
        subcommand: &str,
        repository: &Path,
        exit_code: i32,
    ) -> std::io::Result<()> {
        self.append(&format!(
            "[{}] [{}] [exit:{}] {}",
            user,
            repository.display(),
            exit_code,
            subcommand
        ))
    }

    /// Input that failed the command grammar
    pub fn log_rejected(&self, raw_command: &str, reason: &str) -> std::io::Result<()> {
        self.append(&format!(
            "[REJECTED] command=\"{}\" reason=\"{}\"",
            raw_command.escape_default(),
            reason
        ))
    }

    /// A well-formed request the user is not allowed to make
    pub fn log_denied(&self, user: &str, repository: &str, access: Access) -> std::io::Result<()> {
        let access = match access {
            Access::Read => "read",
            Access::Write => "write",
        };
        self.append(&format!(
            "[DENIED] user=\"{}\" repository=\"{}\" access={}",
            user, repository, access
        ))
    }

    fn append(&self, entry: &str) -> std::io::Result<()> {
        self.rotate_if_needed()?;

        let line = format!("[{}] {}\n", Utc::now().to_rfc3339(), entry);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Rotate log file if it exceeds MAX_LOG_SIZE
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        if !self.log_path.exists() {
            return Ok(());
        }

        if fs::metadata(&self.log_path)?.len() > MAX_LOG_SIZE {
            // access.log -> access.log.1
            let mut backup = self.log_path.clone().into_os_string();
            backup.push(".1");
            fs::rename(&self.log_path, backup)?;
        }

        Ok(())
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}
