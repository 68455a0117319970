use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::repository::gateway::RepositoryError;

/// `[<namespace>/]<name>`: the namespace may not start with a period, exactly
/// one slash separates the parts, and the name may not start with a period.
static REPOSITORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9_+@-][A-Za-z0-9_+@.-]*/)?[A-Za-z0-9_-][A-Za-z0-9_.-]*$")
        .unwrap_or_else(|e| unreachable!("literal regex failed to compile: {e}"))
});

/// Whether `name` is an acceptable repository name
pub fn is_valid_name(name: &str) -> bool {
    REPOSITORY_NAME.is_match(name)
}

/// Clone URLs published by the remote host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneUrls {
    pub read_only: Option<String>,
    pub read_write: Option<String>,
}

/// A repository as known to the remote host, plus its membership lists
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    /// Identifiers with write access
    pub users: BTreeSet<String>,
    /// Identifiers with read-only access
    pub read_only_users: BTreeSet<String>,
    pub is_public: bool,
    #[serde(default)]
    pub clone_urls: CloneUrls,
}

impl Repository {
    pub fn new<U, R>(name: impl Into<String>, users: U, read_only_users: R, is_public: bool) -> Self
    where
        U: IntoIterator<Item = String>,
        R: IntoIterator<Item = String>,
    {
        Self {
            name: name.into(),
            users: users.into_iter().collect(),
            read_only_users: read_only_users.into_iter().collect(),
            is_public,
            clone_urls: CloneUrls::default(),
        }
    }

    /// Check the invariants a repository must hold before it is created
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if !is_valid_name(&self.name) {
            return Err(RepositoryError::InvalidRepository(format!(
                "repository name is not valid: {:?}",
                self.name
            )));
        }
        if self.users.is_empty() {
            return Err(RepositoryError::InvalidRepository(
                "repository should have at least one user".to_string(),
            ));
        }
        Ok(())
    }

    /// Split into optional namespace and bare name
    pub fn split_name(&self) -> (Option<&str>, &str) {
        split_name(&self.name)
    }

    /// The JSON shape handed to API clients
    pub fn view(&self) -> RepositoryView {
        RepositoryView {
            name: self.name.clone(),
            public: self.is_public,
            ssh_url: self.clone_urls.read_write.clone().unwrap_or_default(),
            git_url: self.clone_urls.read_only.clone().unwrap_or_default(),
        }
    }
}

pub fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('/') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, name),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryView {
    pub name: String,
    pub public: bool,
    pub ssh_url: String,
    pub git_url: String,
}

/// Changes `update` knows how to apply; membership goes through grant/revoke
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryUpdate {
    pub is_public: Option<bool>,
}

/// Author or committer identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitUser {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl GitUser {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            date: None,
        }
    }
}

impl fmt::Display for GitUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Intent to commit staged changes in a working clone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommit {
    pub message: String,
    pub author: GitUser,
    pub committer: GitUser,
    pub branch: String,
}

/// One commit of a repository's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLog {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub author: Option<GitUser>,
    pub committer: Option<GitUser>,
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(default)]
    pub parent: Vec<String>,
}

/// A page of history plus the cursor for the following page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHistory {
    pub commits: Vec<GitLog>,
    /// Opaque; `None` once the last page has been returned
    pub next: Option<String>,
}

/// Parameters of a history page request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    /// Ref to walk back from; the default branch when `None`
    pub git_ref: Option<String>,
    page_size: usize,
    /// Only commits touching this path
    pub path: Option<String>,
    /// Cursor taken from a previous page's `next`
    pub start: Option<String>,
}

impl LogQuery {
    pub fn new(git_ref: Option<String>, page_size: usize) -> Self {
        Self {
            git_ref: git_ref.filter(|r| !r.is_empty()),
            page_size,
            path: None,
            start: None,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into()).filter(|p| !p.is_empty());
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.start = Some(cursor.into());
        self
    }

    /// Requested page size, never below one
    pub fn page_size(&self) -> usize {
        self.page_size.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub latest_commit: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub latest_commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveFormat {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zip" => Ok(ArchiveFormat::Zip),
            "tar" => Ok(ArchiveFormat::Tar),
            "tar.gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            other => Err(RepositoryError::InvalidRepository(format!(
                "unsupported archive format: {other}"
            ))),
        }
    }
}

/// API path serving an archive of `repo` at `git_ref`
pub fn archive_url(repo: &str, git_ref: &str, format: ArchiveFormat) -> String {
    format!("/repository/{repo}/archive?ref={git_ref}&format={format}")
}
