//! Core services
//!
//! Each service is exposed to modules as a capability trait bound in the
//! [`ServiceRegistry`](crate::registry::ServiceRegistry). The host owns the
//! concrete providers; modules only ever see `Arc<dyn Trait>` handles obtained
//! through a lookup.
//!
//! Every method that receives text or values from a caller and keeps them, or
//! hands stored data back, goes through
//! [`materialize_locally`](crate::boundary::materialize_locally).

pub mod event_bus;
pub mod logger;
pub mod menu;
pub mod navigation;
pub mod notify;
pub mod settings;
pub mod theme;

pub use event_bus::{Event, EventBusService, EventHandler, SubscriptionId};
pub use logger::{LogLevel, LoggerService};
pub use menu::{MenuError, MenuEvent, MenuItem, MenuService, MenuUpdate};
pub use navigation::{NavigationService, RouteEntry, UiEngine};
pub use notify::{Listener, ListenerId, Notifier};
pub use settings::{SettingsError, SettingsService};
pub use theme::{Theme, ThemePalette, ThemeService};

use crate::boundary::Value;
use crate::registry::Capability;
use crate::version::Version;

/// Route table and current page
pub trait Navigation: Send + Sync {
    /// Append a route; duplicates are kept and the first one wins on lookup
    fn register_route(&self, pattern: &str, page_url: &str);

    fn page_url(&self, pattern: &str) -> Option<String>;

    fn current_route(&self) -> String;

    fn set_current_route(&self, route: &str);

    /// Switch to `route` and ask the UI engine to show its page
    fn navigate(&self, route: &str) -> bool;

    fn routes(&self) -> Vec<RouteEntry>;

    fn on_navigated(&self, owner: &str, listener: Listener<String>) -> ListenerId;

    fn disconnect(&self, id: ListenerId) -> bool;
}

impl Capability for dyn Navigation {
    const ID: &'static str = "Navigation";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Application menu shared by all modules
pub trait Menu: Send + Sync {
    /// Add a copy of `item`; the caller keeps ownership of its storage
    fn register_item(&self, item: &MenuItem) -> Result<(), MenuError>;

    fn unregister_item(&self, id: &str) -> bool;

    /// Remove every item contributed by `plugin_id`
    fn unregister_plugin(&self, plugin_id: &str) -> usize;

    fn update_item(&self, id: &str, update: &MenuUpdate) -> Result<(), MenuError>;

    fn set_badge(&self, id: &str, badge: &str) -> Result<(), MenuError>;

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), MenuError>;

    fn item(&self, id: &str) -> Option<MenuItem>;

    fn items(&self) -> Vec<MenuItem>;

    fn items_in_group(&self, group: &str) -> Vec<MenuItem>;

    fn groups(&self) -> Vec<String>;

    fn count(&self) -> usize;

    fn on_changed(&self, owner: &str, listener: Listener<MenuEvent>) -> ListenerId;

    fn disconnect(&self, id: ListenerId) -> bool;
}

impl Capability for dyn Menu {
    const ID: &'static str = "Menu";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Persistent key/value settings
pub trait Settings: Send + Sync {
    fn value(&self, key: &str) -> Option<Value>;

    fn value_or(&self, key: &str, default: Value) -> Value {
        self.value(key).unwrap_or(default)
    }

    /// Store a copy of `value`; the caller keeps ownership of its storage
    fn set_value(&self, key: &str, value: &Value);

    fn remove(&self, key: &str) -> bool;

    fn contains(&self, key: &str) -> bool;

    fn keys(&self) -> Vec<String>;

    fn save(&self) -> Result<(), SettingsError>;

    fn on_changed(&self, owner: &str, listener: Listener<String>) -> ListenerId;

    fn disconnect(&self, id: ListenerId) -> bool;
}

impl Capability for dyn Settings {
    const ID: &'static str = "Settings";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Colour themes
pub trait Themes: Send + Sync {
    fn current(&self) -> String;

    fn available(&self) -> Vec<String>;

    fn set_theme(&self, name: &str) -> bool;

    /// Colour of `role` (e.g. `background`, `accent`) in the current theme
    fn color(&self, role: &str) -> Option<String>;

    fn is_dark(&self) -> bool;

    fn on_changed(&self, owner: &str, listener: Listener<String>) -> ListenerId;

    fn disconnect(&self, id: ListenerId) -> bool;
}

impl Capability for dyn Themes {
    const ID: &'static str = "Theme";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Logging entry point for modules
///
/// A module binary has its own copy of the `tracing` dispatcher statics, so
/// its macros do not reach the host's subscriber; this capability forwards.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, tag: &str, message: &str);

    fn min_level(&self) -> LogLevel;

    fn set_min_level(&self, level: LogLevel);

    fn debug(&self, tag: &str, message: &str) {
        self.log(LogLevel::Debug, tag, message);
    }

    fn info(&self, tag: &str, message: &str) {
        self.log(LogLevel::Info, tag, message);
    }

    fn warn(&self, tag: &str, message: &str) {
        self.log(LogLevel::Warn, tag, message);
    }

    fn error(&self, tag: &str, message: &str) {
        self.log(LogLevel::Error, tag, message);
    }
}

impl Capability for dyn Logger {
    const ID: &'static str = "Logger";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Topic-based publish/subscribe
pub trait EventBus: Send + Sync {
    /// Subscribe to an exact topic, a `prefix/*` wildcard or `*`
    ///
    /// A module must keep its own clone of `handler` until its unload hook
    /// has run, so the last reference is always dropped on the module's side.
    fn subscribe(&self, pattern: &str, owner: &str, handler: EventHandler) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn unsubscribe_owner(&self, owner: &str) -> usize;

    /// Deliver to every matching subscriber, returning how many were invoked
    fn publish(&self, topic: &str, payload: &Value, sender: &str) -> usize;

    fn subscriber_count(&self, topic: &str) -> usize;
}

impl Capability for dyn EventBus {
    const ID: &'static str = "EventBus";
    const VERSION: Version = Version::new(1, 0, 0);
}

/// Host-side state a module can leave behind in a service
pub trait OwnerScoped: Send + Sync {
    /// Drop everything `owner` registered, returning how many entries went
    fn release_owner(&self, owner: &str) -> usize;
}
