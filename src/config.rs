use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::NimError;
use crate::session::AuthorizationMode;
use crate::tracker::DEFAULT_REFRESH_INTERVAL;

const CONFIG_DIR_NAME: &str = ".solarnode-image-maker";
const CONFIG_FILE_NAME: &str = "config.json";
pub const DEFAULT_NIM_URL: &str = "https://nim.solarnetwork.net";
pub const DEFAULT_SOLARNETWORK_URL: &str = "https://data.solarnetwork.net";

pub const ENV_NIM_URL: &str = "NIM_API_URL";
pub const ENV_SOLARNETWORK_URL: &str = "SOLARNETWORK_API_URL";
pub const ENV_TOKEN_ID: &str = "NIM_TOKEN_ID";
pub const ENV_TOKEN_SECRET: &str = "NIM_TOKEN_SECRET";
pub const ENV_AUTHORIZATION_MODE: &str = "NIM_AUTHORIZATION_MODE";
pub const ENV_RECEIPT_REFRESH_MS: &str = "NIM_RECEIPT_REFRESH_MS";

/// Keys accepted by `nim config get|set`.
pub const CONFIG_KEYS: &[&str] = &[
    "nim_url",
    "solarnetwork_url",
    "token_id",
    "authorization_mode",
    "receipt_refresh_ms",
];

pub fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

/// Saved client settings. The token secret is never part of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_nim_url")]
    pub nim_url: String,
    #[serde(default = "default_solarnetwork_url")]
    pub solarnetwork_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    #[serde(default)]
    pub authorization_mode: AuthorizationMode,
    #[serde(default = "default_receipt_refresh_ms")]
    pub receipt_refresh_ms: u64,
}

fn default_nim_url() -> String {
    DEFAULT_NIM_URL.to_string()
}

fn default_solarnetwork_url() -> String {
    DEFAULT_SOLARNETWORK_URL.to_string()
}

fn default_receipt_refresh_ms() -> u64 {
    DEFAULT_REFRESH_INTERVAL.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nim_url: default_nim_url(),
            solarnetwork_url: default_solarnetwork_url(),
            token_id: None,
            authorization_mode: AuthorizationMode::default(),
            receipt_refresh_ms: default_receipt_refresh_ms(),
        }
    }
}

impl Config {
    /// Saved settings (or defaults when nothing is saved) with environment
    /// overrides applied.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_saved()?;
        config.apply_env()?;
        Ok(config)
    }

    fn load_saved() -> Result<Self> {
        match Self::load_from_file() {
            Ok(config) => Ok(config),
            Err(err) if matches!(err.downcast_ref::<NimError>(), Some(NimError::ConfigNotFound)) => {
                Ok(Config::default())
            }
            Err(err) => Err(err),
        }
    }

    pub fn load_from_file() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Err(NimError::ConfigNotFound.into());
        }

        let contents = fs::read_to_string(&config_path).context("Failed to read config file")?;

        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = env_var(ENV_NIM_URL) {
            self.nim_url = url;
        }
        if let Some(url) = env_var(ENV_SOLARNETWORK_URL) {
            self.solarnetwork_url = url;
        }
        if let Some(token_id) = env_var(ENV_TOKEN_ID) {
            self.token_id = Some(token_id);
        }
        if let Some(mode) = env_var(ENV_AUTHORIZATION_MODE) {
            self.set(ENV_AUTHORIZATION_MODE, "authorization_mode", &mode)?;
        }
        if let Some(ms) = env_var(ENV_RECEIPT_REFRESH_MS) {
            self.set(ENV_RECEIPT_REFRESH_MS, "receipt_refresh_ms", &ms)?;
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_refresh_ms.max(1))
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(match key {
            "nim_url" => Some(self.nim_url.clone()),
            "solarnetwork_url" => Some(self.solarnetwork_url.clone()),
            "token_id" => self.token_id.clone(),
            "authorization_mode" => Some(self.authorization_mode.as_str().to_string()),
            "receipt_refresh_ms" => Some(self.receipt_refresh_ms.to_string()),
            _ => anyhow::bail!(unknown_key(key)),
        })
    }

    /// Set `key` from its string form. `source` names where the value came
    /// from in error messages.
    fn set(&mut self, source: &str, key: &str, value: &str) -> Result<()> {
        match key {
            "nim_url" => self.nim_url = value.to_string(),
            "solarnetwork_url" => self.solarnetwork_url = value.to_string(),
            "token_id" => {
                self.token_id = Some(value.trim().to_string()).filter(|v| !v.is_empty())
            }
            "authorization_mode" => {
                self.authorization_mode = AuthorizationMode::parse(value).with_context(|| {
                    format!(
                        "Invalid {source} '{value}': expected 'solarnetwork' or 'delegated'"
                    )
                })?
            }
            "receipt_refresh_ms" => {
                self.receipt_refresh_ms = value
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .with_context(|| {
                        format!("Invalid {source} '{value}': expected milliseconds > 0")
                    })?
            }
            _ => anyhow::bail!(unknown_key(key)),
        }
        Ok(())
    }

    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.set(key, key, value)
    }

    pub fn save_config(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Invalid config path"))?;

        fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let contents = serde_json::to_string_pretty(&self).context("Failed to serialize config")?;
        write_private(&config_path, &contents)
    }

    /// Apply `updater` to the saved settings (not the environment overrides)
    /// and write them back.
    pub fn update<F>(updater: F) -> Result<Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let mut config = Self::load_saved()?;
        updater(&mut config)?;
        config.save_config()?;
        Ok(config)
    }

    pub fn home_dir() -> Result<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir().context(
            "Could not determine home directory. Please ensure HOME environment variable is set.",
        )
    }

    pub fn config_path() -> Result<PathBuf> {
        let home_dir = Self::home_dir()?;
        Ok(home_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }
}

fn unknown_key(key: &str) -> String {
    format!(
        "Unknown config key '{}'. Valid keys: {}",
        key,
        CONFIG_KEYS.join(", ")
    )
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .context("Failed to open config file for writing")?;

        file.write_all(contents.as_bytes())
            .context("Failed to write config file")?;
    }

    #[cfg(unix)]
    {
        let mut perms = fs::metadata(path)
            .context("Failed to read config file metadata")?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)
            .context("Failed to set secure permissions on config file")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn new(key: &'static str) -> Self {
            Self {
                key,
                original: std::env::var(key).ok(),
            }
        }

        fn set(&self, value: Option<&str>) {
            if let Some(value) = value {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            if let Some(ref value) = self.original {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn clear_overrides() -> Vec<EnvVarGuard> {
        [
            ENV_NIM_URL,
            ENV_SOLARNETWORK_URL,
            ENV_TOKEN_ID,
            ENV_AUTHORIZATION_MODE,
            ENV_RECEIPT_REFRESH_MS,
        ]
        .into_iter()
        .map(|key| {
            let guard = EnvVarGuard::new(key);
            guard.set(None);
            guard
        })
        .collect()
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.refresh_interval(), Duration::from_millis(5000));
        assert!(DEFAULT_NIM_URL.starts_with("https://"));
    }

    #[test]
    fn test_config_serialization_uses_mode_names() {
        let config = Config {
            token_id: Some("abc".to_string()),
            authorization_mode: AuthorizationMode::ImageServiceDelegated,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""authorization_mode":"delegated""#));
        assert!(!json.contains("secret"));

        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_get_and_set_values() {
        let mut config = Config::default();
        config.set_value("token_id", "tok").unwrap();
        config.set_value("authorization_mode", "delegated").unwrap();
        config.set_value("receipt_refresh_ms", "250").unwrap();

        assert_eq!(config.get("token_id").unwrap().as_deref(), Some("tok"));
        assert_eq!(
            config.get("authorization_mode").unwrap().as_deref(),
            Some("delegated")
        );
        assert_eq!(config.refresh_interval(), Duration::from_millis(250));

        assert!(config.set_value("receipt_refresh_ms", "0").is_err());
        assert!(config.set_value("authorization_mode", "maybe").is_err());
        let err = config.get("token_secret").unwrap_err().to_string();
        assert!(err.contains("Valid keys"));
    }

    #[test]
    fn test_load_without_file_uses_defaults_and_env() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _overrides = clear_overrides();
        let home_guard = EnvVarGuard::new("HOME");
        let temp_home = TempDir::new().unwrap();
        home_guard.set(Some(temp_home.path().to_str().unwrap()));

        assert!(Config::load_from_file().is_err());
        assert_eq!(Config::load().unwrap(), Config::default());

        let url_guard = EnvVarGuard::new(ENV_NIM_URL);
        let mode_guard = EnvVarGuard::new(ENV_AUTHORIZATION_MODE);
        url_guard.set(Some("http://localhost:8080"));
        mode_guard.set(Some("delegated"));

        let config = Config::load().unwrap();
        assert_eq!(config.nim_url, "http://localhost:8080");
        assert_eq!(
            config.authorization_mode,
            AuthorizationMode::ImageServiceDelegated
        );

        mode_guard.set(Some("sometimes"));
        assert!(Config::load().is_err());
    }

    #[test]
    fn test_update_writes_private_file() {
        let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let _overrides = clear_overrides();
        let home_guard = EnvVarGuard::new("HOME");
        let temp_home = TempDir::new().unwrap();
        home_guard.set(Some(temp_home.path().to_str().unwrap()));

        Config::update(|config| config.set_value("token_id", "saved-token")).unwrap();

        let path = Config::config_path().unwrap();
        assert!(path.starts_with(temp_home.path()));
        let saved = Config::load_from_file().unwrap();
        assert_eq!(saved.token_id.as_deref(), Some("saved-token"));

        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
