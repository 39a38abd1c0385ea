use std::path::{Path, PathBuf};

use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};

/// Remote store base URL override
pub const ENV_SERVER_URL: &str = "CLIENT_API_URL";
/// SQLite file override
pub const ENV_DATABASE_PATH: &str = "PIGGYBANK_DB_PATH";
/// User signed in by the demo binary
pub const ENV_DEV_USER_ID: &str = "DEV_USER_ID";
/// Optional TOML file read before the overrides
pub const ENV_CONFIG_FILE: &str = "PIGGYBANK_CONFIG";

/// Client configuration wrapper.
///
/// Environment variables win over file and builder values.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
    dev_user_id: Option<String>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        match env_value(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(path),
            None => Self::with_app(AppConfig::default()),
        }
    }

    /// TOML file plus environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::with_app(AppConfig::load(path)?)
    }

    pub fn with_builder(builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        Self::with_app(builder.build()?)
    }

    fn with_app(mut app: AppConfig) -> Result<Self, ConfigError> {
        if let Some(url) = env_value(ENV_SERVER_URL) {
            app.server_url = Some(url);
        }
        if let Some(path) = env_value(ENV_DATABASE_PATH) {
            app.database_path = Some(PathBuf::from(path));
        }
        app.validate()?;
        Ok(Self {
            app,
            dev_user_id: env_value(ENV_DEV_USER_ID),
        })
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn into_app(self) -> AppConfig {
        self.app
    }

    pub fn server_url(&self) -> Option<&str> {
        self.app.server_url.as_deref()
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.app.database_path.as_deref()
    }

    /// Development user id used in place of a sign-in flow
    pub fn dev_user_id(&self) -> Option<&str> {
        self.dev_user_id.as_deref()
    }

    pub fn require_user_id(&self) -> Result<&str, ConfigError> {
        self.dev_user_id().ok_or(ConfigError::MissingValue(ENV_DEV_USER_ID))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for name in [ENV_SERVER_URL, ENV_DATABASE_PATH, ENV_DEV_USER_ID, ENV_CONFIG_FILE] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert!(config.server_url().is_none());
        assert!(config.database_path().is_none());
        assert!(matches!(config.require_user_id(), Err(ConfigError::MissingValue(ENV_DEV_USER_ID))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_SERVER_URL, "https://sync.example.com");
        std::env::set_var(ENV_DATABASE_PATH, "/tmp/piggybank-test.db");
        std::env::set_var(ENV_DEV_USER_ID, "dev-user");

        let config = Config::from_env().unwrap();
        assert_eq!(config.server_url(), Some("https://sync.example.com"));
        assert_eq!(config.database_path(), Some(Path::new("/tmp/piggybank-test.db")));
        assert_eq!(config.require_user_id().unwrap(), "dev-user");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_env_url_is_rejected() {
        clear_env();
        std::env::set_var(ENV_SERVER_URL, "sync.example.com");
        assert!(matches!(Config::from_env(), Err(ConfigError::InvalidUrl(_))));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_wins_over_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server_url = \"http://file.example.com\"\nmax_retries = 7").unwrap();
        std::env::set_var(ENV_CONFIG_FILE, file.path());
        std::env::set_var(ENV_SERVER_URL, "http://env.example.com");

        let config = Config::from_env().unwrap();
        assert_eq!(config.server_url(), Some("http://env.example.com"));
        assert_eq!(config.app().max_retries, 7);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_with_builder() {
        clear_env();
        let config = Config::with_builder(AppConfig::builder().max_retries(5)).unwrap();
        assert_eq!(config.into_app().max_retries, 5);
    }
}
