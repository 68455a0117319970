// Working clone workflow tests
// CloneManager driven through the gateway against a real bare repository

mod helpers;

use std::fs;
use std::sync::Arc;

use gitwarden::git::GitExecutor;
use gitwarden::repository::{
    CloneError, CloneManager, CloneUrls, GitCommit, GitUser, InMemoryGateway, Repository,
};
use helpers::{create_bare_repo, test_config};
use tempfile::TempDir;

fn commit(branch: &str, message: &str) -> GitCommit {
    GitCommit {
        message: message.to_string(),
        author: GitUser::new("Ada Lovelace", "ada@example.com"),
        committer: GitUser::new("Gitwarden", "gitwarden@example.com"),
        branch: branch.to_string(),
    }
}

fn setup(root: &TempDir) -> (CloneManager, std::path::PathBuf) {
    let config = test_config(root);
    let bare = create_bare_repo(&config.git.bare_location, "team/proj");

    let gateway = InMemoryGateway::new();
    let mut repo = Repository::new("team/proj", vec!["alice".to_string()], Vec::new(), false);
    repo.clone_urls = CloneUrls {
        read_only: Some(bare.to_string_lossy().into_owned()),
        read_write: None,
    };
    gateway.insert(repo);

    (CloneManager::from_config(Arc::new(gateway), &config), bare)
}

fn clones_left(root: &TempDir) -> usize {
    fs::read_dir(root.path().join("clones"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_commit_changes_on_new_branch() {
    let root = TempDir::new().unwrap();
    let (manager, bare) = setup(&root);

    manager
        .commit_changes("team/proj", &commit("feature", "Add notes"), true, |dir| {
            fs::write(dir.join("NOTES.md"), "notes\n")
        })
        .await
        .unwrap();

    let log = GitExecutor::new(&bare)
        .run(["log", "-1", "--format=%an <%ae>|%cn|%s", "feature"])
        .await
        .unwrap();
    assert_eq!(log.stdout.trim(), "Ada Lovelace <ada@example.com>|Gitwarden|Add notes");
    assert_eq!(clones_left(&root), 0);
}

#[tokio::test]
async fn test_edit_failure_leaves_remote_untouched() {
    let root = TempDir::new().unwrap();
    let (manager, bare) = setup(&root);
    let before = GitExecutor::new(&bare).run(["rev-parse", "main"]).await.unwrap();

    let result = manager
        .commit_changes("team/proj", &commit("main", "Broken"), false, |_| {
            Err(std::io::Error::other("edit failed"))
        })
        .await;
    assert!(matches!(result, Err(CloneError::Io(_))));

    let after = GitExecutor::new(&bare).run(["rev-parse", "main"]).await.unwrap();
    assert_eq!(before.stdout, after.stdout);
    assert_eq!(clones_left(&root), 0);
}

#[tokio::test]
async fn test_unknown_repository_allocates_nothing() {
    let root = TempDir::new().unwrap();
    let (manager, _bare) = setup(&root);

    let result = manager.allocate("team/other").await;
    assert!(matches!(result, Err(CloneError::Unavailable(_))));
    assert_eq!(clones_left(&root), 0);
}
