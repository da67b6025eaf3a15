//! Configuration management

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server configuration for `oidc-login serve`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before `${VAR}` expansion.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP listener
    pub server: ServerConfig,
    /// Mount path of the endpoint set
    pub mount_path: String,
    /// Bearer token for the config and role endpoints (disabled when unset)
    pub admin_token: Option<String>,
    /// Storage backend
    pub storage: StorageConfig,
    /// Ceiling above which a role's `max_ttl` produces a warning
    #[serde(with = "humantime_serde")]
    pub max_lease_ttl: Duration,
    /// Identity provider client settings
    pub provider: ProviderSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env_files: Vec::new(),
            server: ServerConfig::default(),
            mount_path: "/auth/oauth".to_string(),
            admin_token: None,
            storage: StorageConfig::default(),
            max_lease_ttl: Duration::from_secs(24 * 3600),
            provider: ProviderSettings::default(),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Grace period for in-flight requests on shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8200,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Which storage collaborator backs config and roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Process-local, lost on restart
    Memory,
    /// One JSON file per key below `path`
    File,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind
    pub kind: StorageKind,
    /// Root directory for `kind: file` (supports ~)
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            path: "~/.oidc-login/storage".to_string(),
        }
    }
}

impl StorageConfig {
    /// Storage root with `~` expanded
    #[must_use]
    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(expand_home(&self.path))
    }
}

/// Identity provider client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Timeout for discovery, token and JWKS requests
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// How long a fetched JWKS is reused
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Clock skew tolerated on `exp`
    #[serde(with = "humantime_serde")]
    pub clock_leeway: Duration,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(10),
            jwks_cache_ttl: Duration::from_secs(3600),
            clock_leeway: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("OIDC_LOGIN_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Check values that figment cannot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a mount path that is not absolute.
    pub fn validate(&self) -> Result<()> {
        if !self.mount_path.starts_with('/') || self.mount_path.len() < 2 {
            return Err(Error::Config(format!(
                "mount_path must be an absolute path below '/': {:?}",
                self.mount_path
            )));
        }
        Ok(())
    }

    /// Mount path without a trailing slash
    #[must_use]
    pub fn mount(&self) -> &str {
        self.mount_path.trim_end_matches('/')
    }

    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` in the admin token and storage path
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        if let Some(token) = self.admin_token.as_mut() {
            *token = expand_string(&re, token);
        }
        if self.admin_token.as_deref().is_some_and(str::is_empty) {
            self.admin_token = None;
        }
        self.storage.path = expand_string(&re, &self.storage.path);
        Ok(())
    }
}

fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map_or("", |m| m.as_str());
        env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .into_owned()
}

/// Replace a leading `~` with the home directory
#[must_use]
pub fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8200);
        assert_eq!(config.mount_path, "/auth/oauth");
        assert_eq!(config.storage.kind, StorageKind::Memory);
        assert_eq!(config.max_lease_ttl, Duration::from_secs(86_400));
        assert_eq!(config.provider.clock_leeway, Duration::from_secs(60));
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn load_reads_yaml_file() {
        // GIVEN: a config file with humantime durations
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  port: 9000\nmount_path: /auth/corp\nstorage:\n  kind: file\n  path: /var/lib/oidc\nmax_lease_ttl: 2h\nprovider:\n  http_timeout: 3s"
        )
        .unwrap();

        // WHEN
        let config = Config::load(Some(file.path())).unwrap();

        // THEN
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.mount(), "/auth/corp");
        assert_eq!(config.storage.kind, StorageKind::File);
        assert_eq!(config.storage.resolved_path(), PathBuf::from("/var/lib/oidc"));
        assert_eq!(config.max_lease_ttl, Duration::from_secs(7200));
        assert_eq!(config.provider.http_timeout, Duration::from_secs(3));
    }

    #[test]
    fn load_rejects_missing_file() {
        let result = Config::load(Some(Path::new("/nonexistent/oidc-login.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn relative_mount_path_is_rejected() {
        let config = Config {
            mount_path: "auth/oauth".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn mount_strips_trailing_slash() {
        let config = Config {
            mount_path: "/auth/oauth/".to_string(),
            ..Config::default()
        };
        assert_eq!(config.mount(), "/auth/oauth");
    }

    #[test]
    fn expand_string_uses_default_when_unset() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let value = expand_string(&re, "${OIDC_LOGIN_TEST_SURELY_UNSET:-fallback}");
        assert_eq!(value, "fallback");
    }

    #[test]
    fn empty_admin_token_disables_admin_endpoints() {
        let mut config = Config {
            admin_token: Some("${OIDC_LOGIN_TEST_SURELY_UNSET}".to_string()),
            ..Config::default()
        };
        config.expand_env_vars().unwrap();
        assert!(config.admin_token.is_none());
    }
}
