use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::security::WRITE_SUBCOMMANDS;

/// `<git-subcommand> '[/][<namespace>/]<name>.git'`, anchored on both ends.
///
/// The namespace may not start with a period and exactly one slash separates
/// it from the name, so neither part can climb out of the bare root.
static GIT_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(git-[a-z-]+) '/?((?:[A-Za-z0-9_+@-][A-Za-z0-9_+@.-]*/)?[A-Za-z0-9_-]+)\.git'$")
        .unwrap_or_else(|e| unreachable!("literal regex failed to compile: {e}"))
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("malformed git command, refusing to run it: {0:?}")]
    MalformedCommand(String),
}

/// A git service invocation that passed the grammar check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Service program, e.g. `git-upload-pack`
    pub subcommand: String,
    /// Repository path relative to the bare root, with the `.git` suffix
    pub repository: String,
}

impl ParsedCommand {
    /// Repository name as stored on the remote host (no `.git` suffix)
    pub fn repository_name(&self) -> &str {
        self.repository
            .strip_suffix(".git")
            .unwrap_or(&self.repository)
    }

    /// Whether the service updates refs and therefore needs write access
    pub fn is_write(&self) -> bool {
        WRITE_SUBCOMMANDS.contains(&self.subcommand.as_str())
    }

    /// Absolute location of the bare repository under `bare_root`
    pub fn repository_path(&self, bare_root: &Path) -> PathBuf {
        bare_root.join(&self.repository)
    }

    /// The two-element command that actually gets executed
    pub fn rewrite(&self, bare_root: &Path) -> Vec<String> {
        vec![
            self.subcommand.clone(),
            self.repository_path(bare_root).to_string_lossy().into_owned(),
        ]
    }
}

/// Validate a raw SSH command string and split it into service and repository
pub fn parse_command(raw: &str) -> Result<ParsedCommand, CommandError> {
    let captures = GIT_COMMAND
        .captures(raw)
        .ok_or_else(|| CommandError::MalformedCommand(raw.to_string()))?;

    Ok(ParsedCommand {
        subcommand: captures[1].to_string(),
        repository: format!("{}.git", &captures[2]),
    })
}
