use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::audit::AuditLogger;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::repository::RepositoryGateway;
use crate::security::{Access, ParsedCommand, is_allowed, parse_command};
use crate::user::User;

/// A request that passed parsing and the access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub user: String,
    pub parsed: ParsedCommand,
    /// `[subcommand, absolute bare repository path]`
    pub command: Vec<String>,
}

/// Turns the command an SSH client asked for into the git service to run
pub struct Listener {
    config: Config,
    gateway: Arc<dyn RepositoryGateway>,
    audit: Option<AuditLogger>,
}

impl Listener {
    pub fn new(config: Config, gateway: Arc<dyn RepositoryGateway>, audit: Option<AuditLogger>) -> Self {
        Self {
            config,
            gateway,
            audit,
        }
    }

    /// Parse `raw`, load the repository and check `user` may use the service
    pub async fn authorize(&self, user: &str, raw: &str) -> AppResult<Authorized> {
        let parsed = match parse_command(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(user = %user, command = %raw.escape_default(), "rejected malformed command");
                self.audit(|log| log.log_rejected(raw, &err.to_string()));
                return Err(err.into());
            }
        };

        let acting = User::new(user);
        acting
            .validate()
            .map_err(|e| AppError::PermissionDenied(e.to_string()))?;

        let repo = self.gateway.get(parsed.repository_name()).await?;
        let access = if parsed.is_write() {
            Access::Write
        } else {
            Access::Read
        };
        if !is_allowed(&acting, &repo, access) {
            warn!(user = %user, repo = %repo.name, ?access, "access denied");
            self.audit(|log| log.log_denied(user, &repo.name, access));
            return Err(AppError::PermissionDenied(format!(
                "user {} has no {} access to {}",
                user,
                if access == Access::Write { "write" } else { "read" },
                repo.name
            )));
        }

        let command = parsed.rewrite(&self.config.git.bare_location);
        Ok(Authorized {
            user: user.to_string(),
            parsed,
            command,
        })
    }

    /// Run the rewritten command with the session's stdio; returns its exit code
    pub fn execute(&self, authorized: &Authorized) -> AppResult<i32> {
        let [program, repository] = authorized.command.as_slice() else {
            return Err(AppError::PermissionDenied("malformed rewritten command".to_string()));
        };
        info!(user = %authorized.user, %program, %repository, "running git service");

        let status = Command::new(program)
            .arg(repository)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()?;
        let exit_code = status.code().unwrap_or(-1);

        self.audit(|log| {
            log.log_command(
                &authorized.user,
                program,
                &PathBuf::from(repository),
                exit_code,
            )
        });
        Ok(exit_code)
    }

    /// Audit failures never block the session
    fn audit(&self, write: impl FnOnce(&AuditLogger) -> std::io::Result<()>) {
        if let Some(log) = &self.audit {
            if let Err(err) = write(log) {
                warn!(path = %log.log_path().display(), error = %err, "audit log write failed");
            }
        }
    }
}
