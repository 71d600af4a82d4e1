//! SDK directory layout
//!
//! The SDK root is taken from, in order: the config file, `KILN_SDK_ROOT`,
//! and the `~/.kiln-sdk/current.txt` pointer (which names a version directory
//! next to it). Without an SDK root, directories are resolved relative to the
//! executable (`<exe dir>/../plugins` and so on).

use super::PathsConfig;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SDK_ROOT_ENV: &str = "KILN_SDK_ROOT";
pub const PLUGIN_PATH_ENV: &str = "KILN_PLUGIN_PATH";

/// Resolved directories the host works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPaths {
    pub sdk_root: Option<PathBuf>,
    pub plugin_dir: PathBuf,
    pub qml_dir: PathBuf,
    pub config_dir: PathBuf,
    /// Searched before `plugin_dir`, in order
    pub extra_plugin_paths: Vec<PathBuf>,
}

/// Process inputs the resolution depends on
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub sdk_root: Option<PathBuf>,
    pub plugin_path: Option<OsString>,
    pub home: Option<PathBuf>,
    pub exe_dir: Option<PathBuf>,
}

impl Environment {
    #[must_use]
    pub fn current() -> Self {
        Self {
            sdk_root: std::env::var_os(SDK_ROOT_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            plugin_path: std::env::var_os(PLUGIN_PATH_ENV),
            home: dirs::home_dir(),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
        }
    }
}

impl SdkPaths {
    /// Resolve against the current process environment
    #[must_use]
    pub fn resolve(config: &PathsConfig) -> Self {
        Self::resolve_with(config, &Environment::current())
    }

    #[must_use]
    pub fn resolve_with(config: &PathsConfig, env: &Environment) -> Self {
        let sdk_root = config
            .sdk_root
            .clone()
            .or_else(|| env.sdk_root.clone().filter(|root| root.is_dir()))
            .or_else(|| env.home.as_deref().and_then(current_sdk_version));

        let base = match &sdk_root {
            Some(root) => {
                debug!("Using SDK root {}", root.display());
                root.clone()
            }
            None => env
                .exe_dir
                .as_deref()
                .map_or_else(|| PathBuf::from(".."), |dir| dir.join("..")),
        };

        let mut extra_plugin_paths: Vec<PathBuf> = env
            .plugin_path
            .as_deref()
            .map(|paths| {
                std::env::split_paths(paths)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        extra_plugin_paths.extend(config.extra_plugin_paths.iter().cloned());

        Self {
            plugin_dir: config
                .plugin_dir
                .clone()
                .unwrap_or_else(|| base.join("plugins")),
            qml_dir: config.qml_dir.clone().unwrap_or_else(|| base.join("qml")),
            config_dir: config
                .config_dir
                .clone()
                .unwrap_or_else(|| base.join("config")),
            extra_plugin_paths,
            sdk_root,
        }
    }

    /// Every plugin search path in discovery order
    #[must_use]
    pub fn plugin_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.extra_plugin_paths.clone();
        paths.push(self.plugin_dir.clone());
        paths
    }
}

/// `~/.kiln-sdk/<version>` as named by `~/.kiln-sdk/current.txt`
fn current_sdk_version(home: &Path) -> Option<PathBuf> {
    let base = home.join(".kiln-sdk");
    let version = fs::read_to_string(base.join("current.txt")).ok()?;
    let version = version.trim();
    if version.is_empty() {
        return None;
    }
    let dir = base.join(version);
    dir.is_dir().then_some(dir)
}
