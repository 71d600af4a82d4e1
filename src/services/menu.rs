use super::notify::{Listener, ListenerId, Notifier};
use super::{Menu, OwnerScoped};
use crate::boundary::{materialize_locally, Materialize};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MenuItem {
    pub id: String,
    pub label: String,
    pub icon: String,
    pub route: String,
    pub group: String,
    pub order: i32,
    pub enabled: bool,
    pub badge: String,
    pub plugin_id: String,
}

impl Default for MenuItem {
    fn default() -> Self {
        Self {
            id: String::new(),
            label: String::new(),
            icon: String::new(),
            route: String::new(),
            group: String::new(),
            order: 0,
            enabled: true,
            badge: String::new(),
            plugin_id: String::new(),
        }
    }
}

impl MenuItem {
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>, order: i32) -> Self {
        self.group = group.into();
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = icon.into();
        self
    }

    #[must_use]
    pub fn owned_by(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = plugin_id.into();
        self
    }
}

impl Materialize for MenuItem {
    fn materialize(&self) -> Self {
        Self {
            id: materialize_locally(&self.id),
            label: materialize_locally(&self.label),
            icon: materialize_locally(&self.icon),
            route: materialize_locally(&self.route),
            group: materialize_locally(&self.group),
            order: self.order,
            enabled: self.enabled,
            badge: materialize_locally(&self.badge),
            plugin_id: materialize_locally(&self.plugin_id),
        }
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuUpdate {
    pub label: Option<String>,
    pub icon: Option<String>,
    pub route: Option<String>,
    pub group: Option<String>,
    pub order: Option<i32>,
    pub enabled: Option<bool>,
    pub badge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEvent {
    Added(String),
    Removed(String),
    Updated(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MenuError {
    #[error("menu item id is empty")]
    EmptyId,

    #[error("menu item '{0}' is already registered")]
    DuplicateId(String),

    #[error("menu item '{0}' not found")]
    NotFound(String),
}

/// Menu items kept sorted by group, then order, then label
#[derive(Default)]
pub struct MenuService {
    items: RwLock<Vec<MenuItem>>,
    changed: Notifier<MenuEvent>,
}

impl MenuService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sort(items: &mut [MenuItem]) {
        // Stable: equal keys keep registration order
        items.sort_by(|a, b| {
            (&a.group, a.order, &a.label).cmp(&(&b.group, b.order, &b.label))
        });
    }
}

impl Menu for MenuService {
    fn register_item(&self, item: &MenuItem) -> Result<(), MenuError> {
        if item.id.is_empty() {
            warn!("MenuService: cannot register item with empty id");
            return Err(MenuError::EmptyId);
        }

        let item = materialize_locally(item);
        let id = item.id.clone();
        {
            let mut items = self.items.write();
            if items.iter().any(|existing| existing.id == id) {
                warn!("MenuService: item already registered: {}", id);
                return Err(MenuError::DuplicateId(id));
            }
            debug!("MenuService: registered {} from {}", id, item.plugin_id);
            items.push(item);
            Self::sort(&mut items);
        }
        self.changed.emit(&MenuEvent::Added(id));
        Ok(())
    }

    fn unregister_item(&self, id: &str) -> bool {
        let removed = {
            let mut items = self.items.write();
            let before = items.len();
            items.retain(|item| item.id != id);
            items.len() != before
        };
        if removed {
            self.changed.emit(&MenuEvent::Removed(id.to_string()));
        }
        removed
    }

    fn unregister_plugin(&self, plugin_id: &str) -> usize {
        let removed: Vec<String> = {
            let mut items = self.items.write();
            let (gone, kept): (Vec<MenuItem>, Vec<MenuItem>) =
                items.drain(..).partition(|item| item.plugin_id == plugin_id);
            *items = kept;
            gone.into_iter().map(|item| item.id).collect()
        };
        if !removed.is_empty() {
            debug!("MenuService: removed {} item(s) of {}", removed.len(), plugin_id);
        }
        for id in &removed {
            self.changed.emit(&MenuEvent::Removed(id.clone()));
        }
        removed.len()
    }

    fn update_item(&self, id: &str, update: &MenuUpdate) -> Result<(), MenuError> {
        {
            let mut items = self.items.write();
            let item = items
                .iter_mut()
                .find(|item| item.id == id)
                .ok_or_else(|| MenuError::NotFound(id.to_string()))?;

            let resort = update.group.is_some() || update.order.is_some() || update.label.is_some();
            if let Some(label) = &update.label {
                item.label = materialize_locally(label);
            }
            if let Some(icon) = &update.icon {
                item.icon = materialize_locally(icon);
            }
            if let Some(route) = &update.route {
                item.route = materialize_locally(route);
            }
            if let Some(group) = &update.group {
                item.group = materialize_locally(group);
            }
            if let Some(order) = update.order {
                item.order = order;
            }
            if let Some(enabled) = update.enabled {
                item.enabled = enabled;
            }
            if let Some(badge) = &update.badge {
                item.badge = materialize_locally(badge);
            }
            if resort {
                Self::sort(&mut items);
            }
        }
        self.changed.emit(&MenuEvent::Updated(id.to_string()));
        Ok(())
    }

    fn set_badge(&self, id: &str, badge: &str) -> Result<(), MenuError> {
        self.update_item(
            id,
            &MenuUpdate {
                badge: Some(badge.to_string()),
                ..MenuUpdate::default()
            },
        )
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), MenuError> {
        self.update_item(
            id,
            &MenuUpdate {
                enabled: Some(enabled),
                ..MenuUpdate::default()
            },
        )
    }

    fn item(&self, id: &str) -> Option<MenuItem> {
        self.items
            .read()
            .iter()
            .find(|item| item.id == id)
            .map(materialize_locally)
    }

    fn items(&self) -> Vec<MenuItem> {
        self.items.read().iter().map(materialize_locally).collect()
    }

    fn items_in_group(&self, group: &str) -> Vec<MenuItem> {
        self.items
            .read()
            .iter()
            .filter(|item| item.group == group)
            .map(materialize_locally)
            .collect()
    }

    fn groups(&self) -> Vec<String> {
        let items = self.items.read();
        let groups: BTreeSet<&String> = items
            .iter()
            .map(|item| &item.group)
            .filter(|group| !group.is_empty())
            .collect();
        groups.into_iter().map(materialize_locally).collect()
    }

    fn count(&self) -> usize {
        self.items.read().len()
    }

    fn on_changed(&self, owner: &str, listener: Listener<MenuEvent>) -> ListenerId {
        self.changed.connect(owner, listener)
    }

    fn disconnect(&self, id: ListenerId) -> bool {
        self.changed.disconnect(id)
    }
}

impl OwnerScoped for MenuService {
    fn release_owner(&self, owner: &str) -> usize {
        self.unregister_plugin(owner) + self.changed.disconnect_owner(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn ids(items: &[MenuItem]) -> Vec<(String, i32)> {
        items.iter().map(|i| (i.group.clone(), i.order)).collect()
    }

    #[test]
    fn test_sorted_by_group_then_order() {
        let menu = MenuService::new();
        menu.register_item(&MenuItem::new("b1", "x").with_group("B", 1)).unwrap();
        menu.register_item(&MenuItem::new("a2", "x").with_group("A", 2)).unwrap();
        menu.register_item(&MenuItem::new("a1", "x").with_group("A", 1)).unwrap();

        assert_eq!(
            ids(&menu.items()),
            vec![("A".to_string(), 1), ("A".to_string(), 2), ("B".to_string(), 1)]
        );
        assert_eq!(menu.groups(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(menu.items_in_group("A").len(), 2);
    }

    #[test]
    fn test_rejects_empty_and_duplicate_ids() {
        let menu = MenuService::new();
        assert_eq!(menu.register_item(&MenuItem::new("", "x")), Err(MenuError::EmptyId));
        menu.register_item(&MenuItem::new("rules", "Rules")).unwrap();
        assert_eq!(
            menu.register_item(&MenuItem::new("rules", "Again")),
            Err(MenuError::DuplicateId("rules".to_string()))
        );
        assert_eq!(menu.item("rules").unwrap().label, "Rules");
        assert_eq!(menu.count(), 1);
    }

    #[test]
    fn test_partial_update_resorts() {
        let menu = MenuService::new();
        menu.register_item(&MenuItem::new("a", "A").with_group("G", 1)).unwrap();
        menu.register_item(&MenuItem::new("b", "B").with_group("G", 2)).unwrap();

        menu.update_item(
            "a",
            &MenuUpdate {
                order: Some(3),
                icon: Some("*".to_string()),
                ..MenuUpdate::default()
            },
        )
        .unwrap();

        let items = menu.items();
        assert_eq!(items[0].id, "b");
        assert_eq!(items[1].icon, "*");
        assert_eq!(items[1].label, "A");
        assert_eq!(
            menu.update_item("zzz", &MenuUpdate::default()),
            Err(MenuError::NotFound("zzz".to_string()))
        );
    }

    #[test]
    fn test_badge_and_enabled() {
        let menu = MenuService::new();
        menu.register_item(&MenuItem::new("rules", "Rules")).unwrap();
        assert!(menu.item("rules").unwrap().enabled);

        menu.set_badge("rules", "2").unwrap();
        menu.set_enabled("rules", false).unwrap();
        let item = menu.item("rules").unwrap();
        assert_eq!(item.badge, "2");
        assert!(!item.enabled);
    }

    #[test]
    fn test_unregister_plugin_and_events() {
        let menu = MenuService::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        menu.on_changed(
            "host",
            Arc::new(move |event: &MenuEvent| sink.lock().push(event.clone())),
        );

        menu.register_item(&MenuItem::new("a", "A").owned_by("m")).unwrap();
        menu.register_item(&MenuItem::new("b", "B").owned_by("m")).unwrap();
        menu.register_item(&MenuItem::new("c", "C").owned_by("other")).unwrap();

        assert_eq!(menu.unregister_plugin("m"), 2);
        assert_eq!(menu.count(), 1);
        assert!(!menu.unregister_item("a"));
        assert!(menu.unregister_item("c"));

        let events = events.lock();
        assert_eq!(events.len(), 6);
        assert_eq!(events[3], MenuEvent::Removed("a".to_string()));
    }
}
