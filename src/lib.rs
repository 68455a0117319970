pub mod audit;
pub mod config;
pub mod error;
pub mod git;
pub mod hook;
pub mod repository;
pub mod security;
pub mod ssh;
pub mod user;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{AppError, AppResult, GitError, GitResult};
pub use git::GitVersion;
pub use repository::{
    BitbucketGateway, CloneManager, InMemoryGateway, Repository, RepositoryError,
    RepositoryGateway,
};
pub use security::{Access, ParsedCommand, parse_command};
pub use ssh::Listener;
pub use user::{SshKey, User};
