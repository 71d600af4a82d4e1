use crate::plugins::OrderingPolicy;
use crate::services::LogLevel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

mod paths;

pub use paths::{Environment, SdkPaths, PLUGIN_PATH_ENV, SDK_ROOT_ENV};

/// Host configuration, read from `~/.kiln/config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

/// Overrides for the SDK directory layout; unset entries are detected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    #[serde(default)]
    pub sdk_root: Option<PathBuf>,
    #[serde(default)]
    pub plugin_dir: Option<PathBuf>,
    #[serde(default)]
    pub qml_dir: Option<PathBuf>,
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
    /// Searched before the default plugin directory
    #[serde(default)]
    pub extra_plugin_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PluginsConfig {
    #[serde(default)]
    pub ordering: OrderingPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Level for the host subscriber and the module logger capability
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Page shown when no module declares an entry page
    #[serde(default = "default_main_page")]
    pub main_page: String,
    #[serde(default)]
    pub themes_dir: Option<PathBuf>,
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_main_page() -> String {
    "qrc:/Kiln/Host/Main.qml".to_string()
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            main_page: default_main_page(),
            themes_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from default location
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    /// Returns an error if serialization or writing fails
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_yaml::to_string(self).context("Failed to serialize config")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get default configuration path
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn default_config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;

        Ok(home.join(".kiln").join("config.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.plugins.ordering, OrderingPolicy::Priority);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.ui.theme, "dark");
        assert!(config.paths.extra_plugin_paths.is_empty());
    }

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
plugins:
  ordering: dependencies
logging:
  level: debug
paths:
  extra_plugin_paths:
    - /opt/kiln/dev-plugins
ui:
  theme: light
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.plugins.ordering, OrderingPolicy::Dependencies);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.paths.extra_plugin_paths,
            vec![PathBuf::from("/opt/kiln/dev-plugins")]
        );
        assert_eq!(config.ui.theme, "light");
        assert_eq!(config.ui.main_page, default_main_page());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kiln").join("config.yaml");
        let mut config = Config::default();
        config.ui.theme = "light".to_string();
        config.paths.plugin_dir = Some(PathBuf::from("/srv/plugins"));

        config.save_to_file(&path).unwrap();
        assert_eq!(Config::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_from_file(dir.path().join("absent.yaml")).is_err());
    }
}
