use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::repository::model::{
    ArchiveFormat, Branch, GitHistory, LogQuery, Repository, RepositoryUpdate, Tag,
};
use crate::user::{SshKey, User};

/// Failure talking to the remote version-control host
///
/// Every variant keeps the underlying cause.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote host timed out: {0}")]
    Timeout(#[source] reqwest::Error),

    #[error("remote host unreachable: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("remote host returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response from remote host: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err)
        } else {
            RemoteError::Transport(err)
        }
    }
}

/// Errors surfaced by repository, user and key operations
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    #[error("repository already exists: {0}")]
    AlreadyExists(String),

    #[error("repository not found: {0}")]
    NotFound(String),

    #[error("invalid user: {0}")]
    InvalidUser(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("duplicate key")]
    DuplicateKey,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl RepositoryError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RepositoryError::Remote(RemoteError::Timeout(_)))
    }
}

/// The single point of contact with the remote version-control host
///
/// Implementations are handed to their callers explicitly; nothing in the
/// crate reaches for a process-wide default. Reads are issued with a bounded
/// timeout, and the host's own atomicity is relied upon for concurrent
/// writers, so implementations keep no local locks around remote calls.
#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Validate `repo` and create it remotely with its membership lists
    async fn create(&self, repo: &Repository) -> Result<Repository, RepositoryError>;

    /// Fetch metadata, membership and clone URLs
    async fn get(&self, name: &str) -> Result<Repository, RepositoryError>;

    async fn remove(&self, name: &str) -> Result<(), RepositoryError>;

    /// Confirm the repository exists, then apply the requested changes
    async fn update(&self, name: &str, update: &RepositoryUpdate) -> Result<(), RepositoryError>;

    /// Add users to `users` (or `read_only_users`) of every named repository
    ///
    /// Unknown repositories in the batch are skipped; `NotFound` only when
    /// none of them exist.
    async fn grant_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError>;

    /// Inverse of [`grant_access`](Self::grant_access), same batch rules
    async fn revoke_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError>;

    async fn branches(&self, name: &str) -> Result<Vec<Branch>, RepositoryError>;

    async fn tags(&self, name: &str) -> Result<Vec<Tag>, RepositoryError>;

    /// Diff between two commits, as the remote host renders it
    async fn diff(&self, name: &str, from: &str, to: &str) -> Result<Vec<u8>, RepositoryError>;

    async fn archive(
        &self,
        name: &str,
        git_ref: &str,
        format: ArchiveFormat,
    ) -> Result<Vec<u8>, RepositoryError>;

    /// One page of history; follow `next` for the rest
    async fn logs(&self, name: &str, query: &LogQuery) -> Result<GitHistory, RepositoryError>;

    async fn get_user(&self, name: &str) -> Result<User, RepositoryError>;

    /// Register `label -> public key` pairs for a user
    async fn add_keys(
        &self,
        user: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<(), RepositoryError>;

    async fn list_keys(&self, user: &str) -> Result<Vec<SshKey>, RepositoryError>;

    async fn remove_key(&self, user: &str, id: u64) -> Result<(), RepositoryError>;
}
