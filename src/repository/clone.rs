//! Short-lived local clones used to mutate repository content.
//!
//! A [`WorkingClone`] is owned by exactly one logical operation and walks
//! `Cloned -> CheckedOut -> Staged -> Committed -> Pushed -> Cleaned`, with
//! `Failed` reachable from every step. The directory is removed by
//! [`WorkingClone::release`], and by `Drop` when the owner goes away first
//! (early return, panic, or a cancelled request future).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::git::{GitExecutor, GitVersion};
use crate::repository::gateway::RepositoryGateway;
use crate::repository::model::{GitCommit, GitUser};

const CLONE_PREFIX: &str = "gitwarden_clone";

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("working clone unavailable: {0}")]
    Unavailable(String),

    #[error("working clone {} no longer exists", .0.display())]
    Gone(PathBuf),

    #[error("checkout failed: {stderr}")]
    CheckoutFailed { stderr: String },

    #[error("staging failed: {stderr}")]
    StageFailed { stderr: String },

    #[error("commit failed: {stderr}")]
    CommitFailed { stderr: String },

    #[error("push failed: {stderr}")]
    PushFailed { stderr: String },

    #[error("I/O error in working clone: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneState {
    Cloned,
    CheckedOut,
    Staged,
    Committed,
    Pushed,
    Failed,
    Cleaned,
}

/// Allocates working clones of repositories known to the gateway
#[derive(Clone)]
pub struct CloneManager {
    gateway: Arc<dyn RepositoryGateway>,
    temp_root: PathBuf,
    git_timeout: Option<Duration>,
}

impl CloneManager {
    pub fn new(gateway: Arc<dyn RepositoryGateway>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            temp_root: temp_root.into(),
            git_timeout: None,
        }
    }

    /// Manager rooted at `repository.temp_dir`, bounding every git command by
    /// `git.timeout_seconds`
    pub fn from_config(gateway: Arc<dyn RepositoryGateway>, config: &Config) -> Self {
        Self::new(gateway, &config.repository.temp_dir)
            .with_git_timeout(Duration::from_secs(config.git.timeout_seconds))
    }

    /// Kill any git command of this manager's clones that outlives `timeout`
    pub fn with_git_timeout(mut self, timeout: Duration) -> Self {
        self.git_timeout = Some(timeout);
        self
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn git_timeout(&self) -> Option<Duration> {
        self.git_timeout
    }

    fn executor(&self, dir: &Path) -> GitExecutor {
        let git = GitExecutor::new(dir);
        match self.git_timeout {
            Some(timeout) => git.timeout(timeout),
            None => git,
        }
    }

    /// Clone `repo_name` into a fresh directory under the temp root
    pub async fn allocate(&self, repo_name: &str) -> Result<WorkingClone, CloneError> {
        GitVersion::require_supported()
            .await
            .map_err(|e| CloneError::Unavailable(format!("git is not usable: {e}")))?;

        let repo = self.gateway.get(repo_name).await.map_err(|e| {
            CloneError::Unavailable(format!("repository {repo_name} is unknown: {e}"))
        })?;
        let source = repo
            .clone_urls
            .read_write
            .or(repo.clone_urls.read_only)
            .ok_or_else(|| {
                CloneError::Unavailable(format!("repository {repo_name} has no clone URL"))
            })?;

        fs::create_dir_all(&self.temp_root)?;
        let dir = tempfile::Builder::new()
            .prefix(CLONE_PREFIX)
            .tempdir_in(&self.temp_root)
            .map_err(|e| {
                CloneError::Unavailable(format!("could not create temporary directory: {e}"))
            })?;
        let path = dir.path().to_path_buf();
        debug!(repo = %repo_name, path = %path.display(), "cloning");

        // On failure `dir` is dropped here, taking the directory with it
        self.executor(&path)
            .run(["clone", "--quiet", source.as_str(), "."])
            .await
            .map_err(|e| {
                CloneError::Unavailable(format!("clone of {repo_name} failed: {}", e.output()))
            })?;

        Ok(WorkingClone {
            dir: Some(dir),
            path,
            repository: repo_name.to_string(),
            state: CloneState::Cloned,
            timeout: self.git_timeout,
        })
    }

    /// Allocate, check out `commit.branch`, let `apply` edit the tree, then
    /// stage, commit and push. The clone is released on every path and the
    /// first failure is returned.
    pub async fn commit_changes<F>(
        &self,
        repo_name: &str,
        commit: &GitCommit,
        new_branch: bool,
        apply: F,
    ) -> Result<(), CloneError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        let mut clone = self.allocate(repo_name).await?;
        let result = run_commit(&mut clone, commit, new_branch, apply).await;
        if let Err(err) = clone.release() {
            warn!(repo = %repo_name, error = %err, "working clone vanished before release");
        }
        result
    }
}

async fn run_commit<F>(
    clone: &mut WorkingClone,
    commit: &GitCommit,
    new_branch: bool,
    apply: F,
) -> Result<(), CloneError>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    clone.checkout(&commit.branch, new_branch).await?;
    if let Err(err) = apply(clone.path()) {
        clone.state = CloneState::Failed;
        return Err(err.into());
    }
    clone.stage_all().await?;
    clone
        .commit(&commit.message, &commit.author, &commit.committer)
        .await?;
    clone.push(&commit.branch).await
}

/// An isolated checkout of one repository, owned by one operation
#[derive(Debug)]
pub struct WorkingClone {
    dir: Option<TempDir>,
    path: PathBuf,
    repository: String,
    state: CloneState,
    timeout: Option<Duration>,
}

impl WorkingClone {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn state(&self) -> CloneState {
        self.state
    }

    /// Executor for the clone, or `Gone` when the directory has disappeared
    fn executor(&self) -> Result<GitExecutor, CloneError> {
        if self.dir.is_none() || !self.path.is_dir() {
            return Err(CloneError::Gone(self.path.clone()));
        }
        let git = GitExecutor::new(&self.path);
        Ok(match self.timeout {
            Some(timeout) => git.timeout(timeout),
            None => git,
        })
    }

    /// Record the outcome of a step
    fn advance(&mut self, result: Result<(), CloneError>, next: CloneState) -> Result<(), CloneError> {
        self.state = match &result {
            Ok(()) => next,
            Err(_) => CloneState::Failed,
        };
        result
    }

    /// `git checkout [-b] <branch>`
    pub async fn checkout(&mut self, branch: &str, create: bool) -> Result<(), CloneError> {
        let result: Result<(), CloneError> = async {
            let git = self.executor()?;
            reject_option_like(branch, |stderr| CloneError::CheckoutFailed { stderr })?;
            let mut args = vec!["checkout"];
            if create {
                args.push("-b");
            }
            args.push(branch);
            git.run(args)
                .await
                .map(|_| ())
                .map_err(|e| CloneError::CheckoutFailed { stderr: e.output() })
        }
        .await;
        self.advance(result, CloneState::CheckedOut)
    }

    /// `git add --all`
    pub async fn stage_all(&mut self) -> Result<(), CloneError> {
        let result: Result<(), CloneError> = async {
            self.executor()?
                .run(["add", "--all"])
                .await
                .map(|_| ())
                .map_err(|e| CloneError::StageFailed { stderr: e.output() })
        }
        .await;
        self.advance(result, CloneState::Staged)
    }

    /// Commit staged changes; the author goes on the command line, the
    /// committer through the environment. Empty messages are allowed.
    pub async fn commit(
        &mut self,
        message: &str,
        author: &GitUser,
        committer: &GitUser,
    ) -> Result<(), CloneError> {
        let result: Result<(), CloneError> = async {
            let mut git = self
                .executor()?
                .env("GIT_COMMITTER_NAME", committer.name.as_str())
                .env("GIT_COMMITTER_EMAIL", committer.email.as_str());
            if let Some(date) = &committer.date {
                git = git.env("GIT_COMMITTER_DATE", date.as_str());
            }
            if let Some(date) = &author.date {
                git = git.env("GIT_AUTHOR_DATE", date.as_str());
            }
            let author = author.to_string();
            git.run([
                "commit",
                "-m",
                message,
                "--author",
                author.as_str(),
                "--allow-empty-message",
            ])
            .await
            .map(|_| ())
            .map_err(|e| CloneError::CommitFailed { stderr: e.output() })
        }
        .await;
        self.advance(result, CloneState::Committed)
    }

    /// `git push origin <branch>`; a rejected push is reported, not retried
    pub async fn push(&mut self, branch: &str) -> Result<(), CloneError> {
        let result: Result<(), CloneError> = async {
            let git = self.executor()?;
            reject_option_like(branch, |stderr| CloneError::PushFailed { stderr })?;
            git.run(["push", "origin", branch])
                .await
                .map(|_| ())
                .map_err(|e| CloneError::PushFailed { stderr: e.output() })
        }
        .await;
        self.advance(result, CloneState::Pushed)
    }

    /// Remove the clone directory
    ///
    /// Returns `Gone` when called again or when the directory was removed
    /// out-of-band. A removal failure is logged rather than returned, since
    /// the operation being cleaned up has already concluded.
    pub fn release(&mut self) -> Result<(), CloneError> {
        let Some(dir) = self.dir.take() else {
            return Err(CloneError::Gone(self.path.clone()));
        };
        self.state = CloneState::Cleaned;

        if !self.path.exists() {
            return Err(CloneError::Gone(self.path.clone()));
        }
        if let Err(err) = dir.close() {
            warn!(path = %self.path.display(), error = %err, "failed to remove working clone");
        } else {
            debug!(path = %self.path.display(), "released working clone");
        }
        Ok(())
    }
}

/// Branch names starting with `-` would be read as options by git
fn reject_option_like(
    branch: &str,
    err: impl FnOnce(String) -> CloneError,
) -> Result<(), CloneError> {
    if branch.is_empty() || branch.starts_with('-') {
        return Err(err(format!("invalid branch name: {branch:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryGateway;
    use crate::repository::model::{CloneUrls, Repository};
    use std::process::Command;

    fn git(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Seed")
            .env("GIT_AUTHOR_EMAIL", "seed@example.com")
            .env("GIT_COMMITTER_NAME", "Seed")
            .env("GIT_COMMITTER_EMAIL", "seed@example.com")
            .output()
            .unwrap();
        assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
        String::from_utf8_lossy(&output.stdout).to_string()
    }

    /// A bare "remote" with one commit on `main`, registered in the gateway
    fn setup() -> (TempDir, CloneManager, PathBuf) {
        let root = TempDir::new().unwrap();
        let bare = root.path().join("origin.git");
        let seed = root.path().join("seed");
        fs::create_dir_all(&bare).unwrap();
        fs::create_dir_all(&seed).unwrap();

        git(&bare, &["init", "--bare", "--quiet"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["init", "--quiet"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        fs::write(seed.join("README"), "hello\n").unwrap();
        git(&seed, &["add", "README"]);
        git(&seed, &["commit", "-m", "initial"]);
        git(&seed, &["push", bare.to_str().unwrap(), "main"]);

        let gateway = InMemoryGateway::new();
        let mut repo = Repository::new("team/proj", vec!["alice".to_string()], Vec::new(), false);
        repo.clone_urls = CloneUrls {
            read_only: None,
            read_write: Some(bare.to_string_lossy().into_owned()),
        };
        gateway.insert(repo);

        let manager = CloneManager::new(Arc::new(gateway), root.path().join("clones"));
        (root, manager, bare)
    }

    fn leftover_clones(manager: &CloneManager) -> usize {
        fs::read_dir(manager.temp_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    fn ada() -> GitUser {
        GitUser::new("Ada", "ada@example.com")
    }

    #[tokio::test]
    async fn test_allocate_unknown_repository() {
        let (_root, manager, _bare) = setup();
        let result = manager.allocate("team/missing").await;
        assert!(matches!(result, Err(CloneError::Unavailable(_))));
        assert_eq!(leftover_clones(&manager), 0);
    }

    #[tokio::test]
    async fn test_full_lifecycle_pushes_new_branch() {
        let (_root, manager, bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        assert_eq!(clone.state(), CloneState::Cloned);
        assert!(clone.path().join("README").exists());

        clone.checkout("feature", true).await.unwrap();
        fs::write(clone.path().join("NEW"), "content\n").unwrap();
        clone.stage_all().await.unwrap();
        clone
            .commit("add NEW", &ada(), &GitUser::new("Bot", "bot@example.com"))
            .await
            .unwrap();
        clone.push("feature").await.unwrap();
        assert_eq!(clone.state(), CloneState::Pushed);

        let path = clone.path().to_path_buf();
        clone.release().unwrap();
        assert!(!path.exists());
        assert_eq!(clone.state(), CloneState::Cleaned);

        let log = git(&bare, &["log", "-1", "--format=%an|%ae|%cn|%s", "feature"]);
        assert_eq!(log.trim(), "Ada|ada@example.com|Bot|add NEW");
    }

    #[tokio::test]
    async fn test_empty_commit_message_is_allowed() {
        let (_root, manager, bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        clone.checkout("main", false).await.unwrap();
        fs::write(clone.path().join("README"), "changed\n").unwrap();
        clone.stage_all().await.unwrap();
        clone.commit("", &ada(), &ada()).await.unwrap();
        clone.push("main").await.unwrap();
        clone.release().unwrap();

        let subject = git(&bare, &["log", "-1", "--format=%s", "main"]);
        assert_eq!(subject.trim(), "");
    }

    #[tokio::test]
    async fn test_release_twice_is_gone_not_a_crash() {
        let (_root, manager, _bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        clone.release().unwrap();
        assert!(matches!(clone.release(), Err(CloneError::Gone(_))));
        assert!(matches!(clone.stage_all().await, Err(CloneError::Gone(_))));
        assert_eq!(leftover_clones(&manager), 0);
    }

    #[tokio::test]
    async fn test_out_of_band_removal_is_gone() {
        let (_root, manager, _bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        fs::remove_dir_all(clone.path()).unwrap();

        assert!(matches!(clone.checkout("main", false).await, Err(CloneError::Gone(_))));
        assert_eq!(clone.state(), CloneState::Failed);
        assert!(matches!(clone.release(), Err(CloneError::Gone(_))));
    }

    #[tokio::test]
    async fn test_failed_checkout_reports_stderr() {
        let (_root, manager, _bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        match clone.checkout("does-not-exist", false).await {
            Err(CloneError::CheckoutFailed { stderr }) => assert!(!stderr.is_empty()),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(clone.state(), CloneState::Failed);
        assert!(matches!(
            clone.checkout("--orphan", false).await,
            Err(CloneError::CheckoutFailed { .. })
        ));
        clone.release().unwrap();
    }

    #[tokio::test]
    async fn test_commit_with_nothing_staged_fails() {
        let (_root, manager, _bare) = setup();
        let mut clone = manager.allocate("team/proj").await.unwrap();
        clone.checkout("main", false).await.unwrap();
        assert!(matches!(
            clone.commit("nothing", &ada(), &ada()).await,
            Err(CloneError::CommitFailed { .. })
        ));
        clone.release().unwrap();
    }

    #[tokio::test]
    async fn test_from_config_bounds_git_commands() {
        let (_root, manager, _bare) = setup();
        assert_eq!(manager.git_timeout(), None);

        let mut config = Config::default_config();
        config.git.timeout_seconds = 7;
        let bounded = CloneManager::from_config(Arc::new(InMemoryGateway::new()), &config);
        assert_eq!(bounded.git_timeout(), Some(Duration::from_secs(7)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_step_is_killed_and_fails() {
        use std::os::unix::fs::PermissionsExt;

        let (_root, manager, _bare) = setup();
        let manager = manager.with_git_timeout(Duration::from_millis(500));
        let mut clone = manager.allocate("team/proj").await.unwrap();

        let hook = clone.path().join(".git/hooks/post-checkout");
        fs::create_dir_all(hook.parent().unwrap()).unwrap();
        fs::write(&hook, "#!/bin/sh\nsleep 10\n").unwrap();
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        match clone.checkout("stalled", true).await {
            Err(CloneError::CheckoutFailed { stderr }) => assert!(stderr.contains("timed out")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(clone.state(), CloneState::Failed);
        clone.release().unwrap();
        assert_eq!(leftover_clones(&manager), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let (_root, manager, _bare) = setup();
        let clone = manager.allocate("team/proj").await.unwrap();
        let path = clone.path().to_path_buf();
        drop(clone);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_commit_changes_releases_after_failed_checkout() {
        let (_root, manager, _bare) = setup();
        let commit = GitCommit {
            message: "never".to_string(),
            author: ada(),
            committer: ada(),
            branch: "missing-branch".to_string(),
        };
        let result = manager
            .commit_changes("team/proj", &commit, false, |_| Ok(()))
            .await;
        assert!(matches!(result, Err(CloneError::CheckoutFailed { .. })));
        assert_eq!(leftover_clones(&manager), 0);
    }

    #[tokio::test]
    async fn test_commit_changes_releases_after_failed_push() {
        let (_root, manager, _bare) = setup();
        let commit = GitCommit {
            message: "unpushable".to_string(),
            author: ada(),
            committer: ada(),
            branch: "main".to_string(),
        };
        let result = manager
            .commit_changes("team/proj", &commit, false, |dir| {
                fs::write(dir.join("NEW"), "x")?;
                let status = Command::new("git")
                    .args(["remote", "set-url", "origin", "/nonexistent/remote.git"])
                    .current_dir(dir)
                    .status()?;
                assert!(status.success());
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(CloneError::PushFailed { .. })));
        assert_eq!(leftover_clones(&manager), 0);
    }

    #[tokio::test]
    async fn test_commit_changes_pushes() {
        let (_root, manager, bare) = setup();
        let commit = GitCommit {
            message: "via helper".to_string(),
            author: ada(),
            committer: ada(),
            branch: "main".to_string(),
        };
        manager
            .commit_changes("team/proj", &commit, false, |dir| {
                fs::write(dir.join("docs.md"), "# docs\n")
            })
            .await
            .unwrap();

        assert_eq!(leftover_clones(&manager), 0);
        let files = git(&bare, &["ls-tree", "--name-only", "main"]);
        assert!(files.lines().any(|f| f == "docs.md"));
    }
}
