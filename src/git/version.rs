use crate::error::{GitError, GitResult};
use std::process::Stdio;
use tokio::process::Command;

/// Oldest git accepted for working clones (`checkout -b`, `add --all` and
/// `--allow-empty-message` all behave as expected from here on)
const MIN_GIT_VERSION: (u32, u32) = (2, 20);

/// Version of the git executable found on `PATH`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl GitVersion {
    /// Run `git --version`; fails when no git executable can be spawned
    pub async fn detect() -> GitResult<Self> {
        let output = Command::new("git")
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| GitError::GitVersionDetectionFailed(format!("git is not resolvable: {}", e)))?;

        if !output.status.success() {
            return Err(GitError::GitVersionDetectionFailed(
                "git --version exited with an error".to_string(),
            ));
        }

        Self::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Parse strings like "git version 2.39.2" or "git version 2.39.2.windows.1"
    pub fn parse(raw: &str) -> GitResult<Self> {
        let mut words = raw.split_whitespace();
        let version = match (words.next(), words.next(), words.next()) {
            (Some("git"), Some("version"), Some(version)) => version,
            _ => {
                return Err(GitError::ParseError(format!(
                    "Unexpected git version format: {}",
                    raw.trim()
                )));
            }
        };

        let mut nums = version.split('.');
        let mut component = |name: &str| -> GitResult<u32> {
            nums.next()
                .ok_or_else(|| GitError::ParseError(format!("Missing {} version in {}", name, version)))?
                .parse::<u32>()
                .map_err(|_| GitError::ParseError(format!("Invalid {} version in {}", name, version)))
        };
        let major = component("major")?;
        let minor = component("minor")?;
        // Patch may carry a vendor suffix ("2.39.2-rc0") or be absent
        let patch = component("patch").unwrap_or(0);

        Ok(GitVersion { major, minor, patch })
    }

    pub fn is_supported(&self) -> bool {
        (self.major, self.minor) >= MIN_GIT_VERSION
    }

    /// Detect git and reject versions older than the supported minimum
    pub async fn require_supported() -> GitResult<Self> {
        let version = Self::detect().await?;
        if !version.is_supported() {
            return Err(GitError::GitVersionTooOld(version.to_string()));
        }
        Ok(version)
    }
}

impl std::fmt::Display for GitVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_and_vendor_builds() {
        assert_eq!(
            GitVersion::parse("git version 2.39.2\n").unwrap(),
            GitVersion { major: 2, minor: 39, patch: 2 }
        );
        assert_eq!(
            GitVersion::parse("git version 2.39.2.windows.1").unwrap(),
            GitVersion { major: 2, minor: 39, patch: 2 }
        );
        assert_eq!(GitVersion::parse("git version 2.45").unwrap().patch, 0);
    }

    #[test]
    fn test_parse_rejects_other_output() {
        assert!(GitVersion::parse("").is_err());
        assert!(GitVersion::parse("version 2.39.2").is_err());
        assert!(GitVersion::parse("git version two.one").is_err());
    }

    #[test]
    fn test_minimum_version() {
        assert!(GitVersion { major: 2, minor: 20, patch: 0 }.is_supported());
        assert!(GitVersion { major: 3, minor: 0, patch: 0 }.is_supported());
        assert!(!GitVersion { major: 2, minor: 19, patch: 9 }.is_supported());
        assert!(!GitVersion { major: 1, minor: 9, patch: 5 }.is_supported());
    }

    #[tokio::test]
    async fn test_detect_installed_git() {
        let version = GitVersion::detect().await.unwrap();
        assert!(version.major >= 2);
    }
}
