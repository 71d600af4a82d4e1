//! Plugin manager
//!
//! Drives every discovered module through
//! `Discovered → Loaded → Initialized → Started → Stopped → Unloaded`.
//! Each phase walks the modules in load order and isolates failures: a module
//! that fails moves to `Failed` and the phase continues with the next one.
//! Teardown walks the same order in reverse.

use super::api::{ModuleContext, Plugin};
use super::descriptor::ModuleDescriptor;
use super::error::{DiscoveryError, LifecycleError, ModuleLoadError};
use super::loader::{ModuleImage, ModuleOpener, PluginInstance};
use super::ordering::{dependency_order, priority_order, OrderingPolicy};
use crate::boundary::materialize_locally;
use crate::registry::ServiceRegistry;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleState {
    Discovered,
    Loaded,
    Initialized,
    Started,
    Stopped,
    Unloaded,
    Failed,
}

impl ModuleState {
    /// Whether the state machine allows moving from `self` to `next`
    #[must_use]
    pub fn can_transition_to(self, next: ModuleState) -> bool {
        use ModuleState::*;
        match (self, next) {
            (Unloaded, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Discovered, Loaded)
            | (Loaded, Initialized)
            | (Initialized, Started)
            | (Started | Initialized | Loaded, Stopped)
            | (Discovered | Stopped, Unloaded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Discovered => "discovered",
            ModuleState::Loaded => "loaded",
            ModuleState::Initialized => "initialized",
            ModuleState::Started => "started",
            ModuleState::Stopped => "stopped",
            ModuleState::Unloaded => "unloaded",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything the manager knows about one discovered module
pub struct ModuleRecord {
    descriptor: ModuleDescriptor,
    state: ModuleState,
    path: PathBuf,
    sequence: usize,
    last_error: Option<String>,
    // Declared before `image`: the instance is destroyed before its code is released
    instance: Option<PluginInstance>,
    image: Option<Box<dyn ModuleImage>>,
}

impl ModuleRecord {
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> ModuleState {
        self.state
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Position in discovery order
    #[must_use]
    pub fn sequence(&self) -> usize {
        self.sequence
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// True while the module still holds its instance or binary
    #[must_use]
    pub fn holds_resources(&self) -> bool {
        self.instance.is_some() || self.image.is_some()
    }

    fn summary(&self) -> ModuleSummary {
        ModuleSummary {
            id: self.descriptor.id.clone(),
            name: self.descriptor.display_name().to_string(),
            version: self.descriptor.version.to_string(),
            priority: self.descriptor.priority,
            state: self.state,
            last_error: self.last_error.clone(),
            path: self.path.clone(),
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.descriptor.id)
            .field("state", &self.state)
            .field("path", &self.path)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Diagnostic row for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub priority: i32,
    pub state: ModuleState,
    pub last_error: Option<String>,
    pub path: PathBuf,
}

type UnloadHook = Box<dyn Fn(&str) + Send + Sync>;

/// Plugin manager that discovers modules and runs their lifecycle
pub struct PluginManager {
    registry: Arc<ServiceRegistry>,
    opener: Box<dyn ModuleOpener>,
    policy: OrderingPolicy,
    records: Vec<ModuleRecord>,
    index: HashMap<String, usize>,
    known_files: HashSet<PathBuf>,
    unload_hooks: Vec<UnloadHook>,
}

impl PluginManager {
    /// Create a new plugin manager
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, opener: Box<dyn ModuleOpener>) -> Self {
        Self {
            registry,
            opener,
            policy: OrderingPolicy::default(),
            records: Vec::new(),
            index: HashMap::new(),
            known_files: HashSet::new(),
            unload_hooks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: OrderingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn set_policy(&mut self, policy: OrderingPolicy) {
        self.policy = policy;
    }

    #[must_use]
    pub fn policy(&self) -> OrderingPolicy {
        self.policy
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Run `hook(module_id)` for every module as it is unloaded
    ///
    /// Used to drop host-side state a module contributed (menu entries,
    /// listeners, event subscriptions).
    pub fn add_unload_hook<F>(&mut self, hook: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.unload_hooks.push(Box::new(hook));
    }

    /// Scan `dir` (non-recursively) for module binaries
    ///
    /// Returns how many new modules were discovered. Files already known from
    /// an earlier scan are skipped; a module whose id is already known is
    /// rejected, so the first searched path wins.
    pub fn discover(&mut self, dir: impl AsRef<Path>) -> usize {
        let dir = dir.as_ref();
        match self.scan(dir) {
            Ok(found) => {
                info!("Discovered {} plugin(s) in {}", found, dir.display());
                found
            }
            Err(e) => {
                warn!("{}", e);
                0
            }
        }
    }

    fn scan(&mut self, dir: &Path) -> Result<usize, DiscoveryError> {
        let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::UnreadablePath {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| self.opener.is_candidate(path))
            .collect();
        candidates.sort();

        let mut found = 0;
        for path in candidates {
            let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            if self.known_files.contains(&key) {
                continue;
            }

            // A file that fails to open is retried on the next scan
            let image = match self.opener.open(&path) {
                Ok(image) => image,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };
            self.known_files.insert(key);

            let descriptor = materialize_locally(image.descriptor());
            if let Some(&existing) = self.index.get(&descriptor.id) {
                warn!(
                    "Ignoring duplicate plugin {} at {} (already found at {})",
                    descriptor.id,
                    path.display(),
                    self.records[existing].path.display()
                );
                continue;
            }

            debug!(
                "Discovered plugin {} v{} at {}",
                descriptor.id,
                descriptor.version,
                path.display()
            );
            let sequence = self.records.len();
            self.index.insert(descriptor.id.clone(), sequence);
            self.records.push(ModuleRecord {
                descriptor,
                state: ModuleState::Discovered,
                path,
                sequence,
                last_error: None,
                instance: None,
                image: Some(image),
            });
            found += 1;
        }

        Ok(found)
    }

    /// Load order of every known module
    ///
    /// Under the dependency policy, modules blocked by a cycle come last.
    #[must_use]
    pub fn load_order(&self) -> Vec<usize> {
        let descriptors: Vec<&ModuleDescriptor> =
            self.records.iter().map(|r| &r.descriptor).collect();
        match self.policy {
            OrderingPolicy::Priority => priority_order(&descriptors),
            OrderingPolicy::Dependencies => {
                let mut sorted = dependency_order(&descriptors);
                sorted.order.append(&mut sorted.blocked);
                sorted.order
            }
        }
    }

    fn fail_cycles(&mut self) -> bool {
        if self.policy != OrderingPolicy::Dependencies {
            return true;
        }
        let descriptors: Vec<&ModuleDescriptor> =
            self.records.iter().map(|r| &r.descriptor).collect();
        let blocked = dependency_order(&descriptors).blocked;
        if blocked.is_empty() {
            return true;
        }

        let members = blocked
            .iter()
            .map(|&i| self.records[i].descriptor.id.clone())
            .collect::<Vec<_>>()
            .join(", ");
        let mut all_ok = true;
        for idx in blocked {
            if self.records[idx].state == ModuleState::Discovered {
                self.fail(idx, ModuleLoadError::DependencyCycle(members.clone()).to_string());
                all_ok = false;
            }
        }
        all_ok
    }

    /// Instantiate every discovered module
    ///
    /// Returns true only if every module attempted loaded.
    pub fn load_all(&mut self) -> bool {
        let mut all_ok = self.fail_cycles();

        for idx in self.load_order() {
            if self.records[idx].state != ModuleState::Discovered {
                continue;
            }
            match self.load_one(idx) {
                Ok(()) => {
                    self.transition(idx, ModuleState::Loaded);
                    info!("Loaded plugin: {}", self.records[idx].descriptor.id);
                }
                Err(message) => {
                    self.fail(idx, message);
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    fn load_one(&mut self, idx: usize) -> Result<(), String> {
        let record = &mut self.records[idx];
        let image = record
            .image
            .as_ref()
            .ok_or_else(|| ModuleLoadError::ImageReleased.to_string())?;

        let instance = guarded("create", || image.instantiate())
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())?;

        let reported = guarded("metadata", || materialize_locally(&instance.metadata()))
            .map_err(|e| e.to_string())?;
        if reported.id != record.descriptor.id {
            return Err(ModuleLoadError::DescriptorMismatch {
                expected: record.descriptor.id.clone(),
                actual: reported.id,
            }
            .to_string());
        }

        record.instance = Some(instance);
        Ok(())
    }

    /// Initialize every loaded module with a context bound to its id
    ///
    /// Returns true only if every module attempted initialized.
    pub fn initialize_all(&mut self) -> bool {
        let mut all_ok = true;

        for idx in self.load_order() {
            if self.records[idx].state != ModuleState::Loaded {
                continue;
            }
            let record = &mut self.records[idx];
            let ctx = ModuleContext::new(Arc::clone(&self.registry), record.descriptor.id.clone());
            let outcome = match record.instance.as_mut() {
                Some(instance) => run_phase("initialize", instance, |p| p.initialize(&ctx))
                    .map_err(|e| match e {
                        PhaseError::Returned(message) => LifecycleError::Initialize(message),
                        PhaseError::Lifecycle(e) => e,
                    }),
                None => Err(LifecycleError::Initialize(
                    "module has no instance".to_string(),
                )),
            };

            match outcome {
                Ok(()) => {
                    self.transition(idx, ModuleState::Initialized);
                    info!("Initialized plugin: {}", self.records[idx].descriptor.id);
                }
                Err(e) => {
                    self.fail(idx, e.to_string());
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Start every initialized module
    ///
    /// Returns true only if every module attempted started.
    pub fn start_all(&mut self) -> bool {
        let mut all_ok = true;

        for idx in self.load_order() {
            if self.records[idx].state != ModuleState::Initialized {
                continue;
            }
            let outcome = match self.records[idx].instance.as_mut() {
                Some(instance) => run_phase("start", instance, |p| p.start()).map_err(|e| match e {
                    PhaseError::Returned(message) => LifecycleError::Start(message),
                    PhaseError::Lifecycle(e) => e,
                }),
                None => Err(LifecycleError::Start("module has no instance".to_string())),
            };

            match outcome {
                Ok(()) => {
                    self.transition(idx, ModuleState::Started);
                    info!("Started plugin: {}", self.records[idx].descriptor.id);
                }
                Err(e) => {
                    self.fail(idx, e.to_string());
                    all_ok = false;
                }
            }
        }
        all_ok
    }

    /// Stop modules in reverse load order and retract their bindings
    pub fn stop_all(&mut self) {
        for idx in self.load_order().into_iter().rev() {
            self.stop_one(idx);
        }
    }

    fn stop_one(&mut self, idx: usize) {
        match self.records[idx].state {
            ModuleState::Started => {
                if let Some(instance) = self.records[idx].instance.as_mut() {
                    if let Err(e) = guarded("stop", || instance.stop()) {
                        warn!("Plugin {}: {}", self.records[idx].descriptor.id, e);
                    }
                }
                self.retract(idx);
                self.transition(idx, ModuleState::Stopped);
                info!("Stopped plugin: {}", self.records[idx].descriptor.id);
            }
            ModuleState::Loaded | ModuleState::Initialized => {
                self.retract(idx);
                self.transition(idx, ModuleState::Stopped);
            }
            ModuleState::Failed => self.retract(idx),
            ModuleState::Discovered | ModuleState::Stopped | ModuleState::Unloaded => {}
        }
    }

    /// Destroy instances and release module binaries in reverse load order
    ///
    /// Modules still running are stopped first. Failed modules release their
    /// resources but keep their state and error.
    pub fn unload_all(&mut self) {
        for idx in self.load_order().into_iter().rev() {
            match self.records[idx].state {
                ModuleState::Unloaded => continue,
                ModuleState::Loaded | ModuleState::Initialized | ModuleState::Started => {
                    warn!(
                        "Unloading plugin {} that was not stopped",
                        self.records[idx].descriptor.id
                    );
                    self.stop_one(idx);
                }
                ModuleState::Failed if !self.records[idx].holds_resources() => continue,
                _ => {}
            }
            self.unload_one(idx);
        }
    }

    fn unload_one(&mut self, idx: usize) {
        self.release_contributions(idx);

        let id = self.records[idx].descriptor.id.clone();
        let record = &mut self.records[idx];
        // Instance first: its destroy entry point lives in the image
        record.instance = None;
        record.image = None;

        if record.state != ModuleState::Failed {
            self.transition(idx, ModuleState::Unloaded);
        }
        info!("Unloaded plugin: {}", id);
    }

    /// Retract bindings and run the unload hooks for module `idx`
    fn release_contributions(&self, idx: usize) {
        self.retract(idx);

        let id = &self.records[idx].descriptor.id;
        for hook in &self.unload_hooks {
            if let Err(e) = guarded("unload hook", || hook(id)) {
                warn!("Plugin {}: {}", id, e);
            }
        }
    }

    fn retract(&self, idx: usize) {
        let owner = &self.records[idx].descriptor.id;
        let removed = self.registry.remove_all_for_owner(owner);
        if removed > 0 {
            debug!("Retracted {} binding(s) of {}", removed, owner);
        }
    }

    fn transition(&mut self, idx: usize, next: ModuleState) -> bool {
        let record = &mut self.records[idx];
        if !record.state.can_transition_to(next) {
            error!(
                "Rejected transition of {} from {} to {}",
                record.descriptor.id, record.state, next
            );
            return false;
        }
        record.state = next;
        true
    }

    fn fail(&mut self, idx: usize, message: String) {
        error!("Plugin {} failed: {}", self.records[idx].descriptor.id, message);
        if self.transition(idx, ModuleState::Failed) {
            if self.records[idx].instance.is_some() {
                // Hooks run while the image is still mapped
                self.release_contributions(idx);
            }
            let record = &mut self.records[idx];
            // A module that never started keeps nothing worth running
            record.instance = None;
            record.last_error = Some(message);
        }
    }

    /// State of module `id`
    #[must_use]
    pub fn state(&self, id: &str) -> Option<ModuleState> {
        self.record(id).map(ModuleRecord::state)
    }

    #[must_use]
    pub fn descriptor(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.record(id).map(ModuleRecord::descriptor)
    }

    #[must_use]
    pub fn last_error(&self, id: &str) -> Option<&str> {
        self.record(id).and_then(ModuleRecord::last_error)
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<&ModuleRecord> {
        self.index.get(id).map(|&idx| &self.records[idx])
    }

    /// Records in discovery order
    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.records.iter()
    }

    /// Diagnostic rows in load order
    #[must_use]
    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.load_order()
            .into_iter()
            .map(|idx| self.records[idx].summary())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// UI module URIs of every module that has not failed, in load order
    #[must_use]
    pub fn qml_module_uris(&self) -> Vec<String> {
        self.load_order()
            .into_iter()
            .map(|idx| &self.records[idx])
            .filter(|r| r.state != ModuleState::Failed)
            .flat_map(|r| r.descriptor.qml_modules.iter().cloned())
            .collect()
    }

    /// `(module id, entry page)` of started modules, in load order
    #[must_use]
    pub fn entry_qml_hints(&self) -> Vec<(String, String)> {
        self.load_order()
            .into_iter()
            .map(|idx| &self.records[idx])
            .filter(|r| r.state == ModuleState::Started)
            .filter_map(|r| {
                r.descriptor
                    .entry_qml
                    .as_ref()
                    .map(|entry| (r.descriptor.id.clone(), entry.clone()))
            })
            .collect()
    }
}

impl Drop for PluginManager {
    fn drop(&mut self) {
        if self.records.iter().any(ModuleRecord::holds_resources) {
            self.stop_all();
            self.unload_all();
        }
    }
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("policy", &self.policy)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

enum PhaseError {
    Returned(String),
    Lifecycle(LifecycleError),
}

fn run_phase<F>(phase: &'static str, instance: &mut PluginInstance, f: F) -> Result<(), PhaseError>
where
    F: FnOnce(&mut dyn Plugin) -> anyhow::Result<()>,
{
    match guarded(phase, || f(&mut **instance)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(PhaseError::Returned(format!("{:#}", e))),
        Err(e) => Err(PhaseError::Lifecycle(e)),
    }
}

/// Run module code, turning a panic into an error
fn guarded<R>(phase: &'static str, f: impl FnOnce() -> R) -> Result<R, LifecycleError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        LifecycleError::Panicked { phase, message }
    })
}
