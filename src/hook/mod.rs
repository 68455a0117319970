//! Installation of git hook scripts into bare repositories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::GitConfig;
use crate::repository::is_valid_name;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid hook name: {0:?}")]
    InvalidName(String),

    #[error("invalid repository name: {0:?}")]
    InvalidRepository(String),

    #[error("failed to write hook: {0}")]
    Io(#[from] io::Error),
}

/// Write `content` as hook `name` into each of `repos`, or into the shared
/// template when `repos` is empty. Returns the files written.
pub fn add(
    config: &GitConfig,
    name: &str,
    repos: &[String],
    content: &[u8],
) -> Result<Vec<PathBuf>, HookError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(HookError::InvalidName(name.to_string()));
    }
    if let Some(bad) = repos.iter().find(|r| !is_valid_name(r)) {
        return Err(HookError::InvalidRepository(bad.clone()));
    }

    if repos.is_empty() {
        let path = config.bare_template.join("hooks").join(name);
        write_hook(&path, content)?;
        return Ok(vec![path]);
    }

    let mut written = Vec::with_capacity(repos.len());
    for repo in repos {
        let path = config
            .bare_location
            .join(format!("{repo}.git"))
            .join("hooks")
            .join(name);
        write_hook(&path, content)?;
        written.push(path);
    }
    Ok(written)
}

fn write_hook(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }

    debug!(path = %path.display(), "installed hook");
    Ok(())
}
