//! In-process gateway holding everything in memory.
//!
//! Honors the same contract as the remote-backed gateway, which makes it a
//! drop-in for tests and for embedders that want the gateway semantics
//! without a remote host. `calls()` counts the operations that reached the
//! "remote" side, i.e. got past local validation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::repository::gateway::{RepositoryError, RepositoryGateway};
use crate::repository::model::{
    ArchiveFormat, Branch, GitHistory, GitLog, LogQuery, Repository, RepositoryUpdate, Tag,
    is_valid_name,
};
use crate::user::{self, SshKey, User};

#[derive(Default)]
struct Stored {
    repo: Repository,
    branches: Vec<Branch>,
    tags: Vec<Tag>,
    /// Newest first
    commits: Vec<GitLog>,
    diffs: BTreeMap<(String, String), Vec<u8>>,
    archives: BTreeMap<(String, &'static str), Vec<u8>>,
}

#[derive(Default)]
struct State {
    repos: BTreeMap<String, Stored>,
    users: BTreeSet<String>,
    keys: BTreeMap<String, Vec<SshKey>>,
    next_key_id: u64,
    calls: usize,
}

#[derive(Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Operations that made it past local validation
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Store a repository as-is, clone URLs included
    pub fn insert(&self, repo: Repository) {
        let mut state = self.lock();
        let name = repo.name.clone();
        state.repos.entry(name).or_default().repo = repo;
    }

    pub fn add_user(&self, name: impl Into<String>) {
        self.lock().users.insert(name.into());
    }

    pub fn set_branches(&self, name: &str, branches: Vec<Branch>) {
        if let Some(stored) = self.lock().repos.get_mut(name) {
            stored.branches = branches;
        }
    }

    pub fn set_tags(&self, name: &str, tags: Vec<Tag>) {
        if let Some(stored) = self.lock().repos.get_mut(name) {
            stored.tags = tags;
        }
    }

    /// History, newest commit first
    pub fn set_commits(&self, name: &str, commits: Vec<GitLog>) {
        if let Some(stored) = self.lock().repos.get_mut(name) {
            stored.commits = commits;
        }
    }

    pub fn set_diff(&self, name: &str, from: &str, to: &str, diff: Vec<u8>) {
        if let Some(stored) = self.lock().repos.get_mut(name) {
            stored.diffs.insert((from.to_string(), to.to_string()), diff);
        }
    }

    pub fn set_archive(&self, name: &str, git_ref: &str, format: ArchiveFormat, bytes: Vec<u8>) {
        if let Some(stored) = self.lock().repos.get_mut(name) {
            stored.archives.insert((git_ref.to_string(), format.as_str()), bytes);
        }
    }

    /// Run `f` against a stored repository, counting the call
    fn with_repo<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Stored) -> T,
    ) -> Result<T, RepositoryError> {
        if !is_valid_name(name) {
            return Err(RepositoryError::InvalidRepository(format!(
                "repository name is not valid: {name:?}"
            )));
        }
        let mut state = self.lock();
        state.calls += 1;
        state
            .repos
            .get_mut(name)
            .map(f)
            .ok_or_else(|| RepositoryError::NotFound(name.to_string()))
    }

    fn change_membership(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
        grant: bool,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock();
        state.calls += 1;
        let mut matched = 0;
        for name in repos {
            let Some(stored) = state.repos.get_mut(name) else {
                continue;
            };
            matched += 1;
            // One permission per user, as on the remote host
            let repo = &mut stored.repo;
            for user in users {
                match (grant, read_only) {
                    (true, true) => {
                        if !repo.users.contains(user) {
                            repo.read_only_users.insert(user.clone());
                        }
                    }
                    (true, false) => {
                        repo.read_only_users.remove(user);
                        repo.users.insert(user.clone());
                    }
                    (false, true) => {
                        repo.read_only_users.remove(user);
                    }
                    (false, false) => {
                        if repo.users.remove(user) {
                            repo.read_only_users.remove(user);
                        }
                    }
                }
            }
        }
        if matched == 0 {
            return Err(RepositoryError::NotFound(repos.join(", ")));
        }
        Ok(())
    }

    fn known_user(&self, name: &str) -> Result<User, RepositoryError> {
        let user = User::new(name);
        user.validate()?;
        let mut state = self.lock();
        state.calls += 1;
        if state.users.contains(&user.name) {
            Ok(user)
        } else {
            Err(RepositoryError::UserNotFound(name.to_string()))
        }
    }
}

#[async_trait]
impl RepositoryGateway for InMemoryGateway {
    async fn create(&self, repo: &Repository) -> Result<Repository, RepositoryError> {
        repo.validate()?;
        let mut state = self.lock();
        state.calls += 1;
        if state.repos.contains_key(&repo.name) {
            return Err(RepositoryError::AlreadyExists(repo.name.clone()));
        }
        state.repos.insert(
            repo.name.clone(),
            Stored {
                repo: repo.clone(),
                ..Stored::default()
            },
        );
        Ok(repo.clone())
    }

    async fn get(&self, name: &str) -> Result<Repository, RepositoryError> {
        self.with_repo(name, |stored| stored.repo.clone())
    }

    async fn remove(&self, name: &str) -> Result<(), RepositoryError> {
        self.with_repo(name, |_| ())?;
        self.lock().repos.remove(name);
        Ok(())
    }

    async fn update(&self, name: &str, update: &RepositoryUpdate) -> Result<(), RepositoryError> {
        self.with_repo(name, |stored| {
            if let Some(is_public) = update.is_public {
                stored.repo.is_public = is_public;
            }
        })
    }

    async fn grant_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError> {
        self.change_membership(repos, users, read_only, true)
    }

    async fn revoke_access(
        &self,
        repos: &[String],
        users: &[String],
        read_only: bool,
    ) -> Result<(), RepositoryError> {
        self.change_membership(repos, users, read_only, false)
    }

    async fn branches(&self, name: &str) -> Result<Vec<Branch>, RepositoryError> {
        self.with_repo(name, |stored| stored.branches.clone())
    }

    async fn tags(&self, name: &str) -> Result<Vec<Tag>, RepositoryError> {
        self.with_repo(name, |stored| stored.tags.clone())
    }

    async fn diff(&self, name: &str, from: &str, to: &str) -> Result<Vec<u8>, RepositoryError> {
        self.with_repo(name, |stored| {
            stored
                .diffs
                .get(&(from.to_string(), to.to_string()))
                .cloned()
                .unwrap_or_default()
        })
    }

    async fn archive(
        &self,
        name: &str,
        git_ref: &str,
        format: ArchiveFormat,
    ) -> Result<Vec<u8>, RepositoryError> {
        self.with_repo(name, |stored| {
            stored
                .archives
                .get(&(git_ref.to_string(), format.as_str()))
                .cloned()
                .unwrap_or_default()
        })
    }

    /// Pages over the stored history; the ref and path filters are ignored
    async fn logs(&self, name: &str, query: &LogQuery) -> Result<GitHistory, RepositoryError> {
        self.with_repo(name, |stored| {
            let start = query
                .start
                .as_deref()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(0);
            let end = (start + query.page_size()).min(stored.commits.len());
            let commits = stored.commits.get(start..end).unwrap_or_default().to_vec();
            let next = (end < stored.commits.len()).then(|| end.to_string());
            GitHistory { commits, next }
        })
    }

    async fn get_user(&self, name: &str) -> Result<User, RepositoryError> {
        self.known_user(name)
    }

    async fn add_keys(
        &self,
        user: &str,
        keys: &BTreeMap<String, String>,
    ) -> Result<(), RepositoryError> {
        for body in keys.values() {
            user::validate_key(body)?;
        }
        let owner = self.known_user(user)?;

        let mut state = self.lock();
        let duplicate = keys.values().any(|body| {
            state
                .keys
                .values()
                .flatten()
                .any(|k| k.text == body.trim())
        });
        if duplicate {
            return Err(RepositoryError::DuplicateKey);
        }
        for (label, body) in keys {
            state.next_key_id += 1;
            let key = SshKey {
                id: state.next_key_id,
                label: label.clone(),
                text: body.trim().to_string(),
            };
            state.keys.entry(owner.name.clone()).or_default().push(key);
        }
        Ok(())
    }

    async fn list_keys(&self, user: &str) -> Result<Vec<SshKey>, RepositoryError> {
        let owner = self.known_user(user)?;
        Ok(self.lock().keys.get(&owner.name).cloned().unwrap_or_default())
    }

    async fn remove_key(&self, user: &str, id: u64) -> Result<(), RepositoryError> {
        let owner = self.known_user(user)?;
        let mut state = self.lock();
        let keys = state.keys.entry(owner.name).or_default();
        let before = keys.len();
        keys.retain(|k| k.id != id);
        if keys.len() == before {
            return Err(RepositoryError::KeyNotFound(id.to_string()));
        }
        Ok(())
    }
}
