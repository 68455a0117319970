pub mod settings;

pub use settings::{ApiConfig, AuditConfig, Config, ConfigError, GitConfig, RepositoryConfig};
