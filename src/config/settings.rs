use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "GITWARDEN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/gitwarden.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub git: GitConfig,
    pub repository: RepositoryConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitConfig {
    /// Root directory of the bare repositories
    pub bare_location: PathBuf,
    /// Template directory whose `hooks/` seeds new repositories
    pub bare_template: PathBuf,
    pub timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepositoryConfig {
    /// Root under which working clones are allocated
    pub temp_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub url: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Environment variable that overrides `password`
    #[serde(default = "default_password_env")]
    pub password_env: String,
    /// Project for repository names without a namespace
    pub default_project: String,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuditConfig {
    pub log_path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/log/gitwarden/access.log"),
        }
    }
}

fn default_password_env() -> String {
    "GITWARDEN_API_PASSWORD".to_string()
}

fn default_read_timeout_ms() -> u64 {
    6000
}

fn default_write_timeout_ms() -> u64 {
    30000
}

impl Config {
    /// Config file path: `$GITWARDEN_CONFIG` or `/etc/gitwarden.toml`
    pub fn config_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Load and validate configuration from a file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file readable only by its owner
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        self.validate()?;

        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;

        // The file may carry the API password
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Config {
            git: GitConfig {
                bare_location: PathBuf::from("/var/lib/gitwarden/repositories"),
                bare_template: PathBuf::from("/var/lib/gitwarden/template"),
                timeout_seconds: 30,
            },
            repository: RepositoryConfig {
                temp_dir: std::env::temp_dir(),
            },
            api: ApiConfig {
                url: "http://localhost:7990/rest".to_string(),
                username: "gitwarden".to_string(),
                password: None,
                password_env: default_password_env(),
                default_project: "INFRA".to_string(),
                read_timeout_ms: default_read_timeout_ms(),
                write_timeout_ms: default_write_timeout_ms(),
            },
            audit: AuditConfig::default(),
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.git.bare_location.is_absolute() {
            return Err(ConfigError::InvalidValue(format!(
                "git.bare_location must be absolute: {}",
                self.git.bare_location.display()
            )));
        }

        if self.git.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.api.url.starts_with("http://") && !self.api.url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "api.url must be an http(s) URL: {}",
                self.api.url
            )));
        }

        if self.api.default_project.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "api.default_project must not be empty".to_string(),
            ));
        }

        if self.api.read_timeout_ms == 0 || self.api.write_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "api timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl ApiConfig {
    /// Password from the environment variable, falling back to the file
    pub fn password(&self) -> Option<String> {
        if let Ok(password) = std::env::var(&self.password_env) {
            if !password.is_empty() {
                return Some(password);
            }
        }

        self.password.clone()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
