#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use gitwarden::config::Config;
use tempfile::TempDir;

/// Run git in `dir` with a fixed identity and return stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Seed")
        .env("GIT_AUTHOR_EMAIL", "seed@example.com")
        .env("GIT_COMMITTER_NAME", "Seed")
        .env("GIT_COMMITTER_EMAIL", "seed@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?}: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Create `<bare_root>/<name>.git` with one commit on `main`
pub fn create_bare_repo(bare_root: &Path, name: &str) -> PathBuf {
    let bare = bare_root.join(format!("{name}.git"));
    let seed = bare_root.join(format!(".seed-{}", name.replace('/', "-")));
    fs::create_dir_all(&bare).expect("Failed to create bare dir");
    fs::create_dir_all(&seed).expect("Failed to create seed dir");

    git(&bare, &["init", "--bare", "--quiet"]);
    git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(&seed, &["init", "--quiet"]);
    git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    fs::write(seed.join("README"), "hello\n").expect("Failed to write file");
    git(&seed, &["add", "README"]);
    git(&seed, &["commit", "--quiet", "-m", "initial"]);
    git(&seed, &["push", "--quiet", bare.to_str().expect("utf-8 path"), "main"]);
    fs::remove_dir_all(&seed).expect("Failed to remove seed");

    bare
}

/// Config whose bare root, template and clone root all live under `root`
pub fn test_config(root: &TempDir) -> Config {
    let mut config = Config::default_config();
    config.git.bare_location = root.path().join("repositories");
    config.git.bare_template = root.path().join("template");
    config.repository.temp_dir = root.path().join("clones");
    config.audit.log_path = root.path().join("log/access.log");
    config
}
