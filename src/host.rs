//! Host context
//!
//! [`HostContext`] is the root object of the application. It owns the
//! registry, the core services and the plugin manager, and it is passed
//! explicitly to whatever needs it; there is no global instance.

use crate::config::{Config, SdkPaths};
use crate::plugins::{ModuleOpener, PluginManager};
use crate::registry::{ServiceRegistry, HOST_OWNER};
use crate::services::{
    EventBus, EventBusService, Logger, LoggerService, Menu, MenuService, Navigation,
    NavigationService, OwnerScoped, Settings, SettingsService, ThemeService, Themes, UiEngine,
};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// UI engine that records page loads instead of rendering them
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    pages: Mutex<Vec<String>>,
}

impl HeadlessEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages loaded so far, oldest first
    #[must_use]
    pub fn pages(&self) -> Vec<String> {
        self.pages.lock().clone()
    }
}

impl UiEngine for HeadlessEngine {
    fn load_page(&self, url: &str) -> bool {
        info!("Loading page: {}", url);
        self.pages.lock().push(url.to_string());
        true
    }
}

/// Outcome of [`HostContext::boot`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Modules found per search path, in search order
    pub discovered: Vec<(PathBuf, usize)>,
    pub loaded: bool,
    pub initialized: bool,
    pub started: bool,
}

impl BootReport {
    #[must_use]
    pub fn total_discovered(&self) -> usize {
        self.discovered.iter().map(|(_, count)| count).sum()
    }

    /// True if every module made it through every phase
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.loaded && self.initialized && self.started
    }
}

pub struct HostContext {
    config: Config,
    paths: SdkPaths,
    registry: Arc<ServiceRegistry>,
    navigation: Arc<NavigationService>,
    menu: Arc<MenuService>,
    settings: Arc<SettingsService>,
    themes: Arc<ThemeService>,
    logger: Arc<LoggerService>,
    event_bus: Arc<EventBusService>,
    manager: PluginManager,
    engine: Option<Arc<dyn UiEngine>>,
    shut_down: bool,
}

impl HostContext {
    /// Build the host with directories resolved from the environment
    ///
    /// # Errors
    /// Returns an error if the core services cannot be registered
    pub fn new(config: Config, opener: Box<dyn ModuleOpener>) -> Result<Self> {
        let paths = SdkPaths::resolve(&config.paths);
        Self::with_paths(config, paths, opener)
    }

    /// Build the host with explicit directories
    ///
    /// # Errors
    /// Returns an error if the core services cannot be registered
    pub fn with_paths(config: Config, paths: SdkPaths, opener: Box<dyn ModuleOpener>) -> Result<Self> {
        debug!("Plugin path: {}", paths.plugin_dir.display());
        debug!("QML path: {}", paths.qml_dir.display());
        debug!("Config path: {}", paths.config_dir.display());

        let registry = Arc::new(ServiceRegistry::new());

        let settings_path = paths.config_dir.join("settings.json");
        let settings = match SettingsService::open(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("{}; continuing with empty settings", e);
                SettingsService::in_memory()
            }
        };

        let themes = ThemeService::new();
        let themes_dir = config
            .ui
            .themes_dir
            .clone()
            .or_else(|| ThemeService::default_themes_dir().ok());
        if let Some(dir) = themes_dir {
            if let Err(e) = themes.load_custom_themes(&dir) {
                warn!("{:#}", e);
            }
        }
        themes.set_theme(&config.ui.theme);

        let navigation = Arc::new(NavigationService::new());
        let menu = Arc::new(MenuService::new());
        let settings = Arc::new(settings);
        let themes = Arc::new(themes);
        let logger = Arc::new(LoggerService::new(config.logging.level));
        let event_bus = Arc::new(EventBusService::new());

        register_core_services(&registry, &navigation, &menu, &settings, &themes, &logger, &event_bus)
            .context("Failed to register core services")?;

        let mut manager = PluginManager::new(Arc::clone(&registry), opener)
            .with_policy(config.plugins.ordering);

        let scoped: [Arc<dyn OwnerScoped>; 5] = [
            navigation.clone(),
            menu.clone(),
            settings.clone(),
            themes.clone(),
            event_bus.clone(),
        ];
        manager.add_unload_hook(move |owner| {
            let released: usize = scoped.iter().map(|service| service.release_owner(owner)).sum();
            if released > 0 {
                debug!("Released {} host entries owned by {}", released, owner);
            }
        });

        Ok(Self {
            config,
            paths,
            registry,
            navigation,
            menu,
            settings,
            themes,
            logger,
            event_bus,
            manager,
            engine: None,
            shut_down: false,
        })
    }

    /// Complete navigation setup once the UI engine exists
    pub fn attach_engine(&mut self, engine: Arc<dyn UiEngine>) {
        self.navigation.attach(Arc::clone(&engine));
        self.engine = Some(engine);
    }

    /// Discover, load, initialize and start modules
    ///
    /// Search order: extra paths (`KILN_PLUGIN_PATH`, then config), then
    /// `cli_paths`, then the default plugin directory. A failed module never
    /// stops the others from reaching later phases.
    pub fn boot(&mut self, cli_paths: &[PathBuf]) -> BootReport {
        let mut search = self.paths.plugin_search_paths();
        // The default directory is always last
        let at = search.len() - 1;
        search.splice(at..at, cli_paths.iter().cloned());

        let mut report = BootReport::default();
        for path in search {
            let found = self.manager.discover(&path);
            report.discovered.push((path, found));
        }
        info!("Total discovered {} plugin(s)", report.total_discovered());

        report.loaded = self.manager.load_all();
        report.initialized = self.manager.initialize_all();
        report.started = self.manager.start_all();

        for uri in self.manager.qml_module_uris() {
            debug!("Plugin QML module: {}", uri);
        }
        if !report.all_ok() {
            warn!("Some plugins failed to start; see the plugin list for details");
        }
        report
    }

    /// First module entry page in load order, else the host's main page
    #[must_use]
    pub fn entry_page(&self) -> String {
        if let Some((id, entry)) = self.manager.entry_qml_hints().into_iter().next() {
            debug!("Using entry page of {}", id);
            return entry;
        }
        let local = self.paths.qml_dir.join("Kiln").join("Host").join("Main.qml");
        if local.is_file() {
            return format!("file://{}", local.display());
        }
        self.config.ui.main_page.clone()
    }

    /// Load the entry page into the attached engine
    pub fn show_main_page(&self) -> bool {
        let Some(engine) = &self.engine else {
            warn!("No UI engine attached");
            return false;
        };
        let page = self.entry_page();
        info!("Loading main page: {}", page);
        engine.load_page(&page)
    }

    /// Stop and unload every module, then persist settings
    ///
    /// Runs at most once; also called on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.manager.stop_all();
        self.manager.unload_all();

        if let Err(e) = self.settings.save() {
            warn!("{}", e);
        }
        info!("Host shut down");
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut PluginManager {
        &mut self.manager
    }

    #[must_use]
    pub fn navigation(&self) -> &Arc<NavigationService> {
        &self.navigation
    }

    #[must_use]
    pub fn menu(&self) -> &Arc<MenuService> {
        &self.menu
    }

    #[must_use]
    pub fn settings(&self) -> &Arc<SettingsService> {
        &self.settings
    }

    #[must_use]
    pub fn themes(&self) -> &Arc<ThemeService> {
        &self.themes
    }

    #[must_use]
    pub fn logger(&self) -> &Arc<LoggerService> {
        &self.logger
    }

    #[must_use]
    pub fn event_bus(&self) -> &Arc<EventBusService> {
        &self.event_bus
    }

    #[must_use]
    pub fn paths(&self) -> &SdkPaths {
        &self.paths
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory the settings file lives in
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.paths.config_dir
    }
}

impl Drop for HostContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn register_core_services(
    registry: &ServiceRegistry,
    navigation: &Arc<NavigationService>,
    menu: &Arc<MenuService>,
    settings: &Arc<SettingsService>,
    themes: &Arc<ThemeService>,
    logger: &Arc<LoggerService>,
    event_bus: &Arc<EventBusService>,
) -> Result<()> {
    let navigation: Arc<dyn Navigation> = navigation.clone();
    let menu: Arc<dyn Menu> = menu.clone();
    let settings: Arc<dyn Settings> = settings.clone();
    let themes: Arc<dyn Themes> = themes.clone();
    let logger: Arc<dyn Logger> = logger.clone();
    let event_bus: Arc<dyn EventBus> = event_bus.clone();

    registry.add(&navigation, HOST_OWNER)?;
    registry.add(&menu, HOST_OWNER)?;
    registry.add(&settings, HOST_OWNER)?;
    registry.add(&themes, HOST_OWNER)?;
    registry.add(&logger, HOST_OWNER)?;
    registry.add(&event_bus, HOST_OWNER)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::StaticOpener;
    use tempfile::TempDir;

    fn host(dir: &TempDir) -> HostContext {
        let paths = SdkPaths {
            sdk_root: None,
            plugin_dir: dir.path().join("plugins"),
            qml_dir: dir.path().join("qml"),
            config_dir: dir.path().join("config"),
            extra_plugin_paths: Vec::new(),
        };
        let mut config = Config::default();
        config.ui.themes_dir = Some(dir.path().join("themes"));
        HostContext::with_paths(config, paths, Box::new(StaticOpener::new())).unwrap()
    }

    #[test]
    fn test_core_services_are_registered() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir);
        for id in ["Navigation", "Menu", "Settings", "Theme", "Logger", "EventBus"] {
            assert!(host.registry().contains(id), "{id} missing");
        }
        assert!(host.registry().get::<dyn Navigation>().is_some());
        assert!(host
            .registry()
            .bindings()
            .iter()
            .all(|binding| binding.owner == HOST_OWNER && binding.alive));
    }

    #[test]
    fn test_boot_without_plugins_uses_main_page() {
        let dir = TempDir::new().unwrap();
        let mut host = host(&dir);
        let engine = Arc::new(HeadlessEngine::new());
        assert!(!host.navigation().is_attached());
        host.attach_engine(engine.clone());
        assert!(host.navigation().is_attached());

        let report = host.boot(&[]);
        assert_eq!(report.total_discovered(), 0);
        assert!(report.all_ok());
        assert!(host.show_main_page());
        assert_eq!(engine.pages(), vec!["qrc:/Kiln/Host/Main.qml".to_string()]);
    }

    #[test]
    fn test_local_main_page_is_a_file_url() {
        let dir = TempDir::new().unwrap();
        let page_dir = dir.path().join("qml").join("Kiln").join("Host");
        std::fs::create_dir_all(&page_dir).unwrap();
        std::fs::write(page_dir.join("Main.qml"), b"Item {}").unwrap();

        let mut host = host(&dir);
        let engine = Arc::new(HeadlessEngine::new());
        host.attach_engine(engine.clone());
        host.boot(&[]);

        let page = host.entry_page();
        assert!(page.starts_with("file://"), "{page}");
        assert!(page.ends_with("Main.qml"));
        assert!(host.show_main_page());
        assert_eq!(engine.pages(), vec![page]);
    }

    #[test]
    fn test_shutdown_persists_settings() {
        let dir = TempDir::new().unwrap();
        {
            let host = host(&dir);
            host.settings().set_value("last", &crate::boundary::Value::from("rules"));
        }
        assert!(dir.path().join("config").join("settings.json").is_file());
    }
}
