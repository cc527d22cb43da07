//! Bridge configuration management.
//!
//! Settings live in `~/.config/linkmate/config.json`. Environment variables
//! override the file so the bridge can run unattended.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const ENV_BASE_URL: &str = "LINKMATE_BASE_URL";
const ENV_ACCESS_TOKEN: &str = "LINKMATE_ACCESS_TOKEN";
const ENV_DEVICE_NAME: &str = "LINKMATE_DEVICE_NAME";

const DEFAULT_REPORT_INTERVAL_SECS: u64 = 60;

/// On-disk form of the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    device_id: String,
    #[serde(default)]
    device_name: String,
    #[serde(default)]
    report_interval_secs: u64,
}

/// Bridge configuration.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Hub base URL, e.g. `http://homeassistant.local:8123`.
    pub base_url: String,

    /// Long-lived access token.
    pub access_token: String,

    /// Stable device identifier used in entity ids.
    pub device_id: String,

    /// Human-readable device name used in friendly names.
    pub device_name: String,

    /// How often device sensors are pushed to the hub.
    pub report_interval: Duration,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .field("report_interval", &self.report_interval)
            .finish()
    }
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "LinkMate".into())
}

fn default_device_id() -> String {
    use sha2::Digest;
    let data = format!("{}-{}-linkmate", default_name(), std::env::consts::OS);
    let digest = sha2::Sha256::digest(data.as_bytes());
    hex::encode(&digest[..4])
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            device_id: default_device_id(),
            device_name: default_name(),
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS),
        }
    }
}

impl BridgeConfig {
    /// Loads the configuration file (if any) and applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&config_path()?)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads from an explicit path. A missing file yields defaults.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                if !file.base_url.is_empty() {
                    config.base_url = file.base_url;
                }
                if !file.access_token.is_empty() {
                    config.access_token = file.access_token;
                }
                if !file.device_id.is_empty() {
                    config.device_id = file.device_id;
                }
                if !file.device_name.is_empty() {
                    config.device_name = file.device_name;
                }
                if file.report_interval_secs > 0 {
                    config.report_interval = Duration::from_secs(file.report_interval_secs);
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse bridge config, using defaults"
                );
            }
        }
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.access_token = token;
        }
        if let Some(name) = non_empty(ENV_DEVICE_NAME) {
            self.device_name = name;
        }
    }

    /// Returns `true` if a configuration file has been written before.
    pub fn exists() -> bool {
        config_path().is_ok_and(|path| path.exists())
    }

    /// Returns `true` when both the hub URL and the token are set.
    pub fn is_complete(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.access_token.trim().is_empty()
    }

    /// Saves the configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&config_path()?)
    }

    /// Saves to an explicit path, readable only by the owner.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = ConfigFile {
            base_url: self.base_url.clone(),
            access_token: self.access_token.clone(),
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            report_interval_secs: self.report_interval.as_secs(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        set_permissions_0600(path);

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("linkmate").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(dir) = std::env::var("XDG_CONFIG_HOME")
            && !dir.is_empty()
        {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_id_is_eight_hex_chars() {
        let id = default_device_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, default_device_id());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BridgeConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert!(!config.is_complete());
        assert_eq!(config.report_interval, Duration::from_secs(60));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("linkmate").join("config.json");
        let config = BridgeConfig {
            base_url: "http://hub.local:8123".into(),
            access_token: "token".into(),
            device_id: "a1b2c3d4".into(),
            device_name: "Kitchen tablet".into(),
            report_interval: Duration::from_secs(15),
        };
        config.save_to(&path).unwrap();

        let loaded = BridgeConfig::load_from(&path).unwrap();
        assert!(loaded.is_complete());
        assert_eq!(loaded.device_id, "a1b2c3d4");
        assert_eq!(loaded.device_name, "Kitchen tablet");
        assert_eq!(loaded.report_interval, Duration::from_secs(15));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let config = BridgeConfig::load_from(&path).unwrap();
        assert_eq!(config.base_url, "");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = BridgeConfig {
            base_url: "http://old".into(),
            access_token: "old".into(),
            ..BridgeConfig::default()
        };
        config.apply_env(|key| match key {
            ENV_BASE_URL => Some("https://new.example".into()),
            ENV_ACCESS_TOKEN => Some("   ".into()),
            ENV_DEVICE_NAME => Some("Hallway".into()),
            _ => None,
        });
        assert_eq!(config.base_url, "https://new.example");
        assert_eq!(config.access_token, "old");
        assert_eq!(config.device_name, "Hallway");
    }

    #[test]
    fn debug_redacts_token() {
        let config = BridgeConfig {
            access_token: "super-secret".into(),
            ..BridgeConfig::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
