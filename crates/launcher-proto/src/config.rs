use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub back: BackConfig,
    #[serde(default)]
    pub views: ViewsConfig,
    #[serde(default)]
    pub random: RandomConfig,
    #[serde(default)]
    pub upgrade: UpgradeConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Where and how to reach the back process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackConfig {
    #[serde(default = "default_back_address")]
    pub address: String,
    /// How many times to try connecting before giving up on startup.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewsConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Library used for playlist filtering when a route has no recognised
    /// library name.
    #[serde(default = "default_library")]
    pub default_library: String,
    /// Reconciliation tick interval.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomConfig {
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeConfig {
    /// Folder upgrade stages are installed into.  Chosen interactively the
    /// first time an install runs if unset or not writable.
    #[serde(default)]
    pub install_folder: Option<PathBuf>,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

/// User-configurable paths for caches and downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Decoded playlist icons.  Defaults to `{cache_dir}/icons`.
    #[serde(default = "default_icon_cache_dir")]
    pub icon_cache_dir: PathBuf,
    /// Upgrade archives are staged here before extraction.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

impl Default for BackConfig {
    fn default() -> Self {
        Self {
            address: default_back_address(),
            connect_attempts: default_connect_attempts(),
            connect_retry_ms: default_connect_retry_ms(),
        }
    }
}

impl Default for ViewsConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            default_library: default_library(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for RandomConfig {
    fn default() -> Self {
        Self {
            low_water_mark: default_low_water_mark(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            install_folder: None,
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            icon_cache_dir: default_icon_cache_dir(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_back_address() -> String {
    platform::back_address()
}

fn default_connect_attempts() -> u32 {
    20
}

fn default_connect_retry_ms() -> u64 {
    250
}

fn default_page_size() -> u32 {
    250
}

fn default_library() -> String {
    "arcade".to_string()
}

fn default_tick_ms() -> u64 {
    50
}

fn default_low_water_mark() -> usize {
    15
}

fn default_batch_size() -> usize {
    50
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_icon_cache_dir() -> PathBuf {
    platform::cache_dir().join("icons")
}

fn default_download_dir() -> PathBuf {
    platform::cache_dir().join("upgrades")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Load from `path`, writing defaults there first if it doesn't exist.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.views.page_size, 250);
        assert_eq!(config.views.default_library, "arcade");
        assert_eq!(config.random.low_water_mark, 15);
        assert_eq!(config.random.batch_size, 50);
        assert_eq!(config.upgrade.progress_interval_ms, 100);
        assert!(config.upgrade.install_folder.is_none());
        assert!(config.paths.icon_cache_dir.ends_with("launcher/icons"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str("[views]\npage_size = 10\n").unwrap();
        assert_eq!(config.views.page_size, 10);
        assert_eq!(config.views.default_library, "arcade");
        assert_eq!(config.back.connect_attempts, 20);
    }

    #[test]
    fn test_load_creates_file_then_round_trips_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::load_from(&path).unwrap();
        assert!(path.exists());

        config.upgrade.install_folder = Some(PathBuf::from("/games/content"));
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(
            reloaded.upgrade.install_folder,
            Some(PathBuf::from("/games/content"))
        );
    }
}
