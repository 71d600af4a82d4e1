use super::notify::{Listener, ListenerId, Notifier};
use super::{Navigation, OwnerScoped};
use crate::boundary::{materialize_locally, Materialize};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// The declarative UI layer, seen from the host
pub trait UiEngine: Send + Sync {
    /// Show the page at `url`, returning false if it could not be loaded
    fn load_page(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub pattern: String,
    pub page_url: String,
}

impl Materialize for RouteEntry {
    fn materialize(&self) -> Self {
        Self {
            pattern: materialize_locally(&self.pattern),
            page_url: materialize_locally(&self.page_url),
        }
    }
}

/// Route table with first-match lookup
///
/// Built before the UI engine exists; [`NavigationService::attach`] completes
/// construction once it does.
#[derive(Default)]
pub struct NavigationService {
    routes: RwLock<Vec<RouteEntry>>,
    current: RwLock<String>,
    engine: RwLock<Option<Arc<dyn UiEngine>>>,
    navigated: Notifier<String>,
}

impl NavigationService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, engine: Arc<dyn UiEngine>) {
        *self.engine.write() = Some(engine);
        debug!("NavigationService: UI engine attached");
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.engine.read().is_some()
    }
}

impl Navigation for NavigationService {
    fn register_route(&self, pattern: &str, page_url: &str) {
        let entry = RouteEntry {
            pattern: materialize_locally(&pattern.to_string()),
            page_url: materialize_locally(&page_url.to_string()),
        };
        debug!("NavigationService: registered route {} -> {}", pattern, page_url);
        self.routes.write().push(entry);
    }

    fn page_url(&self, pattern: &str) -> Option<String> {
        let routes = self.routes.read();
        let found = routes
            .iter()
            .find(|entry| entry.pattern == pattern)
            .map(|entry| materialize_locally(&entry.page_url));
        if found.is_none() {
            warn!("NavigationService: no page URL found for route {}", pattern);
        }
        found
    }

    fn current_route(&self) -> String {
        materialize_locally(&*self.current.read())
    }

    fn set_current_route(&self, route: &str) {
        let route = materialize_locally(&route.to_string());
        {
            let mut current = self.current.write();
            if *current == route {
                return;
            }
            current.clone_from(&route);
        }
        self.navigated.emit(&route);
    }

    fn navigate(&self, route: &str) -> bool {
        let Some(url) = self.page_url(route) else {
            return false;
        };
        let Some(engine) = self.engine.read().clone() else {
            warn!("NavigationService: cannot navigate to {} before a UI engine is attached", route);
            return false;
        };
        self.set_current_route(route);
        engine.load_page(&url)
    }

    fn routes(&self) -> Vec<RouteEntry> {
        self.routes.read().iter().map(materialize_locally).collect()
    }

    fn on_navigated(&self, owner: &str, listener: Listener<String>) -> ListenerId {
        self.navigated.connect(owner, listener)
    }

    fn disconnect(&self, id: ListenerId) -> bool {
        self.navigated.disconnect(id)
    }
}

impl OwnerScoped for NavigationService {
    fn release_owner(&self, owner: &str) -> usize {
        self.navigated.disconnect_owner(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        loaded: Mutex<Vec<String>>,
    }

    impl UiEngine for RecordingEngine {
        fn load_page(&self, url: &str) -> bool {
            self.loaded.lock().push(url.to_string());
            true
        }
    }

    #[test]
    fn test_duplicate_route_resolves_to_first() {
        let nav = NavigationService::new();
        nav.register_route("orders", "qrc:/first.qml");
        nav.register_route("orders", "qrc:/second.qml");

        assert_eq!(nav.page_url("orders").as_deref(), Some("qrc:/first.qml"));
        assert_eq!(nav.routes().len(), 2);
        assert_eq!(nav.page_url("missing"), None);
    }

    #[test]
    fn test_set_current_route_emits_on_change_only() {
        let nav = NavigationService::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        nav.on_navigated(
            "host",
            Arc::new(move |route: &String| sink.lock().push(route.clone())),
        );

        nav.set_current_route("home");
        nav.set_current_route("home");
        nav.set_current_route("rules");

        assert_eq!(*seen.lock(), vec!["home".to_string(), "rules".to_string()]);
        assert_eq!(nav.current_route(), "rules");
    }

    #[test]
    fn test_navigate_requires_engine() {
        let nav = NavigationService::new();
        nav.register_route("rules", "file:///rules.qml");
        assert!(!nav.navigate("rules"));
        assert_eq!(nav.current_route(), "");

        let engine = Arc::new(RecordingEngine::default());
        nav.attach(engine.clone());
        assert!(nav.navigate("rules"));
        assert!(!nav.navigate("unknown"));
        assert_eq!(nav.current_route(), "rules");
        assert_eq!(*engine.loaded.lock(), vec!["file:///rules.qml".to_string()]);
    }

    #[test]
    fn test_release_owner_drops_listeners() {
        let nav = NavigationService::new();
        nav.on_navigated("com.example.a", Arc::new(|_: &String| {}));
        assert_eq!(nav.release_owner("com.example.a"), 1);
    }
}
