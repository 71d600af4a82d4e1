use super::notify::{Listener, ListenerId, Notifier};
use super::{OwnerScoped, Themes};
use crate::boundary::materialize_locally;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A named colour scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    pub dark: bool,
    pub palette: ThemePalette,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemePalette {
    pub background: String,
    pub surface: String,
    pub foreground: String,
    pub muted: String,
    pub border: String,
    pub primary: String,
    pub accent: String,
    pub selection: String,
    pub success: String,
    pub warning: String,
    pub error: String,
}

impl ThemePalette {
    /// Look up a colour by role name
    #[must_use]
    pub fn role(&self, role: &str) -> Option<&String> {
        let color = match role {
            "background" => &self.background,
            "surface" => &self.surface,
            "foreground" => &self.foreground,
            "muted" => &self.muted,
            "border" => &self.border,
            "primary" => &self.primary,
            "accent" => &self.accent,
            "selection" => &self.selection,
            "success" => &self.success,
            "warning" => &self.warning,
            "error" => &self.error,
            _ => return None,
        };
        Some(color)
    }
}

impl Theme {
    /// Dark theme (default)
    #[must_use]
    pub fn dark() -> Self {
        Self {
            name: "Dark".to_string(),
            dark: true,
            palette: ThemePalette {
                background: "#000000".to_string(),
                surface: "#1A0A0A".to_string(),
                foreground: "#D0C0C0".to_string(),
                muted: "#5A4A4A".to_string(),
                border: "#4A3A3A".to_string(),
                primary: "#DD6666".to_string(),
                accent: "#B05A7A".to_string(),
                selection: "#2A1A1A".to_string(),
                success: "#5A8A6A".to_string(),
                warning: "#C8A870".to_string(),
                error: "#EE5555".to_string(),
            },
        }
    }

    #[must_use]
    pub fn light() -> Self {
        Self {
            name: "Light".to_string(),
            dark: false,
            palette: ThemePalette {
                background: "#FFFFFF".to_string(),
                surface: "#F0F0F0".to_string(),
                foreground: "#000000".to_string(),
                muted: "#767676".to_string(),
                border: "#D0D0D0".to_string(),
                primary: "#0087FF".to_string(),
                accent: "#AF00DB".to_string(),
                selection: "#B4D5FE".to_string(),
                success: "#008700".to_string(),
                warning: "#D75F00".to_string(),
                error: "#D70000".to_string(),
            },
        }
    }
}

/// Theme selection shared by the host and modules
pub struct ThemeService {
    available: RwLock<HashMap<String, Theme>>,
    current: RwLock<Theme>,
    changed: Notifier<String>,
}

impl ThemeService {
    /// Create a theme service with the built-in themes, starting on `Dark`
    #[must_use]
    pub fn new() -> Self {
        let mut available = HashMap::new();
        for theme in [Theme::dark(), Theme::light()] {
            available.insert(theme.name.to_lowercase(), theme);
        }
        Self {
            available: RwLock::new(available),
            current: RwLock::new(Theme::dark()),
            changed: Notifier::new(),
        }
    }

    /// Snapshot of the current theme
    #[must_use]
    pub fn current_theme(&self) -> Theme {
        self.current.read().clone()
    }

    pub fn add_theme(&self, theme: Theme) {
        let name = theme.name.to_lowercase();
        self.available.write().insert(name, theme);
    }

    /// Load every `.yaml`/`.yml` theme in `dir`
    ///
    /// Files that fail to parse are skipped with a warning. Returns the number
    /// of themes added.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read
    pub fn load_custom_themes(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to read themes directory {}", dir.display()))?
        {
            let path = entry?.path();
            let is_yaml = path
                .extension()
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if !is_yaml {
                continue;
            }
            match Self::load_theme_from_file(&path) {
                Ok(theme) => {
                    debug!("Loaded theme {} from {}", theme.name, path.display());
                    self.add_theme(theme);
                    loaded += 1;
                }
                Err(e) => warn!("Failed to load theme from {}: {:#}", path.display(), e),
            }
        }
        Ok(loaded)
    }

    fn load_theme_from_file(path: &Path) -> Result<Theme> {
        let contents = fs::read_to_string(path).context("Failed to read theme file")?;
        let theme: Theme = serde_yaml::from_str(&contents).context("Failed to parse theme file")?;
        Ok(theme)
    }

    /// Default custom themes directory
    ///
    /// # Errors
    /// Returns an error if the home directory cannot be determined
    pub fn default_themes_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".kiln").join("themes"))
    }
}

impl Default for ThemeService {
    fn default() -> Self {
        Self::new()
    }
}

impl Themes for ThemeService {
    fn current(&self) -> String {
        materialize_locally(&self.current.read().name)
    }

    fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.available.read().keys().map(materialize_locally).collect();
        names.sort();
        names
    }

    fn set_theme(&self, name: &str) -> bool {
        let Some(theme) = self.available.read().get(&name.to_lowercase()).cloned() else {
            warn!("Unknown theme: {}", name);
            return false;
        };
        let changed_to = {
            let mut current = self.current.write();
            if current.name == theme.name {
                return true;
            }
            *current = theme;
            current.name.clone()
        };
        self.changed.emit(&changed_to);
        true
    }

    fn color(&self, role: &str) -> Option<String> {
        self.current.read().palette.role(role).map(materialize_locally)
    }

    fn is_dark(&self) -> bool {
        self.current.read().dark
    }

    fn on_changed(&self, owner: &str, listener: Listener<String>) -> ListenerId {
        self.changed.connect(owner, listener)
    }

    fn disconnect(&self, id: ListenerId) -> bool {
        self.changed.disconnect(id)
    }
}

impl OwnerScoped for ThemeService {
    fn release_owner(&self, owner: &str) -> usize {
        self.changed.disconnect_owner(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_theme_service_creation() {
        let themes = ThemeService::new();
        assert_eq!(themes.current(), "Dark");
        assert!(themes.is_dark());
        assert_eq!(themes.available(), vec!["dark".to_string(), "light".to_string()]);
    }

    #[test]
    fn test_theme_switching() {
        let themes = ThemeService::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        themes.on_changed(
            "host",
            Arc::new(move |_: &String| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(themes.set_theme("light"));
        assert!(themes.set_theme("Light"));
        assert!(!themes.set_theme("nonexistent"));

        assert_eq!(themes.current(), "Light");
        assert!(!themes.is_dark());
        assert_eq!(themes.color("background").as_deref(), Some("#FFFFFF"));
        assert_eq!(themes.color("nope"), None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_load_custom_themes() {
        let dir = TempDir::new().unwrap();
        let mut nord = Theme::dark();
        nord.name = "Nord".to_string();
        nord.palette.background = "#2E3440".to_string();
        fs::write(dir.path().join("nord.yaml"), serde_yaml::to_string(&nord).unwrap()).unwrap();
        fs::write(dir.path().join("broken.yml"), "name: [").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let themes = ThemeService::new();
        assert_eq!(themes.load_custom_themes(dir.path()).unwrap(), 1);
        assert!(themes.set_theme("nord"));
        assert_eq!(themes.color("background").as_deref(), Some("#2E3440"));
    }

    #[test]
    fn test_returned_strings_are_detached_copies() {
        let themes = ThemeService::new();
        let color = themes.color("primary").unwrap();
        {
            let current = themes.current.read();
            let stored = current.palette.role("primary").unwrap();
            assert_eq!(&color, stored);
            assert_ne!(color.as_ptr(), stored.as_ptr());
        }

        let names = themes.available();
        let stored = themes.available.read();
        for name in &names {
            let (key, _) = stored.get_key_value(name).unwrap();
            assert_ne!(name.as_ptr(), key.as_ptr());
        }
    }
}
