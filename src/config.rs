//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub teams: TeamsConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub bind_address: String,
}

/// Azure AD application registration and redirect targets.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamsConfig {
    pub app_id: String,
    pub app_secret: String,
    pub tenant: String,
    pub app_redirect_uri: String,
    pub app_scopes: Vec<String>,
    pub app_redirect_uri_on_success: String,
    pub app_redirect_uri_on_logout: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub authority_url: String,
    pub graph_base_url: String,
    pub graph_api_version: String,
    pub http_timeout_seconds: u64,
    pub http_connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path of the local users file. Empty selects the platform data directory.
    #[serde(default)]
    pub users_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::parse(CONFIG_TOML)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without applying overrides or validation.
    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).context("Failed to parse config.toml")
    }

    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 8] = [
            ("TEAMS_APP_ID", &mut self.teams.app_id),
            ("TEAMS_APP_SECRET", &mut self.teams.app_secret),
            ("TEAMS_TENANT_ID", &mut self.teams.tenant),
            ("TEAMS_REDIRECT_URI", &mut self.teams.app_redirect_uri),
            (
                "TEAMS_REDIRECT_URI_ON_SUCCESS",
                &mut self.teams.app_redirect_uri_on_success,
            ),
            (
                "TEAMS_REDIRECT_URI_ON_LOGOUT",
                &mut self.teams.app_redirect_uri_on_logout,
            ),
            ("TEAMS_BIND_ADDRESS", &mut self.app.bind_address),
            ("TEAMS_USERS_FILE", &mut self.storage.users_file),
        ];

        for (name, slot) in overrides {
            if let Ok(value) = env::var(name) {
                *slot = value;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.teams.app_id.is_empty() || self.teams.app_id == "YOUR_AZURE_AD_APP_ID" {
            anyhow::bail!(
                "Azure AD app_id not configured. Set TEAMS_APP_ID environment variable \
                 or update config.toml"
            );
        }

        if self.teams.app_secret.is_empty() || self.teams.app_secret == "YOUR_AZURE_AD_APP_SECRET"
        {
            anyhow::bail!(
                "Azure AD app_secret not configured. Set TEAMS_APP_SECRET environment variable \
                 or update config.toml"
            );
        }

        if self.teams.tenant.is_empty() {
            anyhow::bail!("Azure AD tenant must not be empty");
        }

        if self.teams.app_scopes.is_empty() {
            anyhow::bail!("app_scopes must contain at least one scope");
        }

        if self.api.http_timeout_seconds == 0 || self.api.http_connect_timeout_seconds == 0 {
            anyhow::bail!(
                "http_timeout_seconds and http_connect_timeout_seconds must be at least 1"
            );
        }

        for (name, uri) in [
            ("app_redirect_uri", &self.teams.app_redirect_uri),
            (
                "app_redirect_uri_on_success",
                &self.teams.app_redirect_uri_on_success,
            ),
            (
                "app_redirect_uri_on_logout",
                &self.teams.app_redirect_uri_on_logout,
            ),
        ] {
            Url::parse(uri).with_context(|| format!("{} is not a valid URL: {}", name, uri))?;
        }

        Ok(())
    }

    /// Get the authorization URL for Azure AD.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.api.authority_url.trim_end_matches('/'),
            self.teams.tenant
        )
    }

    /// Get the token URL for Azure AD.
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.api.authority_url.trim_end_matches('/'),
            self.teams.tenant
        )
    }

    /// Graph endpoint for the signed-in user's profile.
    pub fn graph_me_url(&self) -> String {
        format!(
            "{}/{}/me",
            self.api.graph_base_url.trim_end_matches('/'),
            self.api.graph_api_version
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.api.http_timeout_seconds)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.api.http_connect_timeout_seconds)
    }

    /// Explicit local users file, if one was configured.
    pub fn users_file(&self) -> Option<PathBuf> {
        if self.storage.users_file.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.storage.users_file))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config() -> Config {
        Config {
            app: AppConfig {
                name: "test".into(),
                bind_address: "127.0.0.1:0".into(),
            },
            teams: TeamsConfig {
                app_id: "test-client".into(),
                app_secret: "test-secret".into(),
                tenant: "test-tenant".into(),
                app_redirect_uri: "https://app.example.com/".into(),
                app_scopes: vec!["openid".into(), "offline_access".into(), "User.Read".into()],
                app_redirect_uri_on_success: "https://app.example.com/home".into(),
                app_redirect_uri_on_logout: "https://app.example.com/bye".into(),
            },
            api: ApiConfig {
                authority_url: "https://login.microsoftonline.com".into(),
                graph_base_url: "https://graph.microsoft.com".into(),
                graph_api_version: "v1.0".into(),
                http_timeout_seconds: 5,
                http_connect_timeout_seconds: 2,
            },
            storage: StorageConfig {
                users_file: String::new(),
            },
            logging: LoggingConfig {
                level: "info".into(),
            },
        }
    }

    #[test]
    fn test_config_parsing() {
        // Placeholder credentials fail validation, but parsing must work
        let result = Config::parse(CONFIG_TOML);
        assert!(result.is_ok(), "Config parsing failed: {:?}", result.err());

        let config = result.unwrap();
        assert!(config.teams.app_scopes.contains(&"offline_access".to_string()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_urls() {
        let config = test_config();

        assert_eq!(
            config.authorize_url(),
            "https://login.microsoftonline.com/test-tenant/oauth2/v2.0/authorize"
        );
        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/test-tenant/oauth2/v2.0/token"
        );
        assert_eq!(config.graph_me_url(), "https://graph.microsoft.com/v1.0/me");
    }

    #[test]
    fn test_validate() {
        let config = test_config();
        assert!(config.validate().is_ok());

        let mut no_scopes = test_config();
        no_scopes.teams.app_scopes.clear();
        assert!(no_scopes.validate().is_err());

        let mut bad_uri = test_config();
        bad_uri.teams.app_redirect_uri_on_logout = "not a url".into();
        assert!(bad_uri.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let mut no_timeout = test_config();
        no_timeout.api.http_timeout_seconds = 0;
        let err = no_timeout.validate().unwrap_err();
        assert!(err.to_string().contains("http_timeout_seconds"));

        let mut no_connect_timeout = test_config();
        no_connect_timeout.api.http_connect_timeout_seconds = 0;
        assert!(no_connect_timeout.validate().is_err());
    }

    #[test]
    fn test_users_file() {
        let mut config = test_config();
        assert!(config.users_file().is_none());

        config.storage.users_file = "/tmp/users.json".into();
        assert_eq!(config.users_file(), Some(PathBuf::from("/tmp/users.json")));
    }
}
