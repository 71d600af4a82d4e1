use super::notify::{Listener, ListenerId, Notifier};
use super::{OwnerScoped, Settings};
use crate::boundary::{materialize_locally, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("settings file {0} does not contain a JSON object")]
    NotAnObject(PathBuf),
}

/// Key/value settings persisted as a JSON object
pub struct SettingsService {
    path: Option<PathBuf>,
    values: RwLock<BTreeMap<String, Value>>,
    changed: Notifier<String>,
}

impl SettingsService {
    /// Settings that are never written to disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(BTreeMap::new()),
            changed: Notifier::new(),
        }
    }

    /// Open the settings stored at `path`; a missing file starts empty
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let service = Self {
            path: Some(path.into()),
            values: RwLock::new(BTreeMap::new()),
            changed: Notifier::new(),
        };
        service.reload()?;
        Ok(service)
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Replace the in-memory values with the file contents
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed
    pub fn reload(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !path.exists() {
            debug!("No settings file at {}, starting empty", path.display());
            self.values.write().clear();
            return Ok(());
        }

        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let json: serde_json::Value =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        let Value::Map(map) = Value::from(json) else {
            return Err(SettingsError::NotAnObject(path.clone()));
        };

        info!("Loaded {} setting(s) from {}", map.len(), path.display());
        *self.values.write() = map;
        Ok(())
    }
}

impl Settings for SettingsService {
    fn value(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).map(materialize_locally)
    }

    fn set_value(&self, key: &str, value: &Value) {
        let key = materialize_locally(&key.to_string());
        let value = materialize_locally(value);
        {
            let mut values = self.values.write();
            if values.get(&key) == Some(&value) {
                return;
            }
            values.insert(key.clone(), value);
        }
        self.changed.emit(&key);
    }

    fn remove(&self, key: &str) -> bool {
        let removed = self.values.write().remove(key).is_some();
        if removed {
            self.changed.emit(&key.to_string());
        }
        removed
    }

    fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.values.read().keys().map(materialize_locally).collect()
    }

    fn save(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let io_error = |source| SettingsError::Io {
            path: path.clone(),
            source,
        };

        let json = serde_json::Value::from(&Value::Map(self.values.read().clone()));
        let contents = serde_json::to_string_pretty(&json).map_err(|source| SettingsError::Parse {
            path: path.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, contents).map_err(io_error)?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    fn on_changed(&self, owner: &str, listener: Listener<String>) -> ListenerId {
        self.changed.connect(owner, listener)
    }

    fn disconnect(&self, id: ListenerId) -> bool {
        self.changed.disconnect(id)
    }
}

impl OwnerScoped for SettingsService {
    fn release_owner(&self, owner: &str) -> usize {
        self.changed.disconnect_owner(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_set_and_get() {
        let settings = SettingsService::in_memory();
        settings.set_value("theme", &Value::from("dark"));
        assert_eq!(settings.value("theme"), Some(Value::from("dark")));
        assert_eq!(settings.value_or("missing", Value::Int(3)), Value::Int(3));
        assert!(settings.contains("theme"));
        assert!(settings.remove("theme"));
        assert!(!settings.remove("theme"));
    }

    #[test]
    fn test_caller_keeps_its_value() {
        let settings = SettingsService::in_memory();
        let value = Value::from("orders");
        settings.set_value("route", &value);

        let values = settings.values.read();
        let (Value::String(stored), Value::String(ours)) = (&values["route"], &value) else {
            panic!("expected strings");
        };
        assert_eq!(stored, ours);
        assert_ne!(stored.as_ptr(), ours.as_ptr());
        drop(values);

        drop(value);
        assert_eq!(settings.value("route"), Some(Value::from("orders")));
    }

    #[test]
    fn test_change_emitted_only_when_value_changes() {
        let settings = SettingsService::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        settings.on_changed("host", Arc::new(move |key: &String| sink.lock().push(key.clone())));

        settings.set_value("a", &Value::Int(1));
        settings.set_value("a", &Value::Int(1));
        settings.set_value("a", &Value::Int(2));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = SettingsService::open(&path).unwrap();
        assert!(settings.keys().is_empty());
        settings.set_value("window.width", &Value::Int(1280));
        settings.set_value("recent", &Value::StringList(vec!["a".into(), "b".into()]));
        settings.save().unwrap();

        let reopened = SettingsService::open(&path).unwrap();
        assert_eq!(reopened.value("window.width"), Some(Value::Int(1280)));
        assert_eq!(reopened.keys(), vec!["recent".to_string(), "window.width".to_string()]);
    }

    #[test]
    fn test_rejects_non_object_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(
            SettingsService::open(&path),
            Err(SettingsError::NotAnObject(_))
        ));
    }
}
