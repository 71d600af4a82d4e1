use super::api::{
    destroy_local_plugin, plugin_into_raw, AbiVersionFn, CreateFn, DescriptorFn, DestroyFn,
    Plugin, ABI_VERSION_SYMBOL, CREATE_SYMBOL, DESCRIPTOR_SYMBOL, DESTROY_SYMBOL,
    KILN_ABI_VERSION,
};
use super::descriptor::ModuleDescriptor;
use super::error::{DiscoveryError, ModuleLoadError};
use libloading::{Library, Symbol};
use std::collections::HashMap;
use std::ffi::{c_void, OsStr};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Root object of a loaded module
///
/// Owns the raw plugin pointer and the destroy function exported by the
/// binary that created it, so the plugin is always freed by its own allocator.
pub struct PluginInstance {
    raw: *mut c_void,
    destroy: DestroyFn,
}

// Safety: `Plugin: Send`, and the raw pointer is only dereferenced through
// `&self`/`&mut self` borrows of this wrapper.
unsafe impl Send for PluginInstance {}

impl PluginInstance {
    /// Take ownership of a pointer produced by a module's create entry point
    ///
    /// # Safety
    /// `raw` must come from `plugin_into_raw` in the binary that exports
    /// `destroy`, and `destroy` must stay callable for the lifetime of the
    /// instance.
    pub unsafe fn from_raw(raw: *mut c_void, destroy: DestroyFn) -> Result<Self, ModuleLoadError> {
        if raw.is_null() {
            return Err(ModuleLoadError::NullInstance);
        }
        Ok(Self { raw, destroy })
    }

    /// Wrap a plugin constructed inside the host binary
    #[must_use]
    pub fn local(plugin: Box<dyn Plugin>) -> Self {
        Self {
            raw: plugin_into_raw(plugin),
            destroy: destroy_local_plugin,
        }
    }
}

impl Deref for PluginInstance {
    type Target = dyn Plugin;

    fn deref(&self) -> &Self::Target {
        // SAFETY: raw is non-null and points to a Box<dyn Plugin> until drop
        unsafe { &**self.raw.cast::<Box<dyn Plugin>>() }
    }
}

impl DerefMut for PluginInstance {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { &mut **self.raw.cast::<Box<dyn Plugin>>() }
    }
}

impl Drop for PluginInstance {
    fn drop(&mut self) {
        // SAFETY: raw came from the create entry point paired with destroy
        unsafe { (self.destroy)(self.raw) }
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance").field("raw", &self.raw).finish()
    }
}

/// An opened module binary whose descriptor has been read
///
/// Dropping the image releases the binary; every instance created from it
/// must be dropped first.
pub trait ModuleImage: Send {
    fn path(&self) -> &Path;

    fn descriptor(&self) -> &ModuleDescriptor;

    /// Validate the ABI and entry points and construct the root instance
    fn instantiate(&self) -> Result<PluginInstance, ModuleLoadError>;
}

/// Recognises and opens module binaries found on a search path
pub trait ModuleOpener: Send + Sync {
    fn is_candidate(&self, path: &Path) -> bool;

    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, DiscoveryError>;
}

/// Opens platform dynamic libraries (`.so`, `.dll`, `.dylib`)
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibOpener;

impl DylibOpener {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ModuleOpener for DylibOpener {
    fn is_candidate(&self, path: &Path) -> bool {
        path.is_file() && path.extension() == Some(OsStr::new(std::env::consts::DLL_EXTENSION))
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, DiscoveryError> {
        let unreadable = |reason: String| DiscoveryError::UnreadableDescriptor {
            path: path.to_path_buf(),
            reason,
        };

        // Safety: modules are trusted binaries from known directories
        let library = unsafe { Library::new(path) }.map_err(|e| unreadable(e.to_string()))?;

        // Safety: the symbol type matches the contract of declare_plugin!
        let text = unsafe {
            let entry: Symbol<DescriptorFn> = library
                .get(DESCRIPTOR_SYMBOL)
                .map_err(|_| unreadable("missing kiln_plugin_descriptor".to_string()))?;
            entry().to_local_string()
        }
        .ok_or_else(|| unreadable("descriptor is not valid UTF-8".to_string()))?;

        let descriptor =
            ModuleDescriptor::from_json(&text).map_err(|e| unreadable(e.to_string()))?;

        debug!("Read descriptor {} from {}", descriptor.id, path.display());

        Ok(Box::new(DylibImage {
            descriptor,
            path: path.to_path_buf(),
            library,
        }))
    }
}

struct DylibImage {
    descriptor: ModuleDescriptor,
    path: PathBuf,
    library: Library,
}

impl ModuleImage for DylibImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn instantiate(&self) -> Result<PluginInstance, ModuleLoadError> {
        // Safety: symbol types match declare_plugin!, and the library outlives
        // the returned instance because the manager drops instances first.
        unsafe {
            let abi: Symbol<AbiVersionFn> = self
                .library
                .get(ABI_VERSION_SYMBOL)
                .map_err(|_| ModuleLoadError::MissingEntryPoint("kiln_plugin_abi_version"))?;
            let actual = abi();
            if actual != KILN_ABI_VERSION {
                return Err(ModuleLoadError::AbiMismatch {
                    expected: KILN_ABI_VERSION,
                    actual,
                });
            }

            let create: Symbol<CreateFn> = self
                .library
                .get(CREATE_SYMBOL)
                .map_err(|_| ModuleLoadError::MissingEntryPoint("kiln_plugin_create"))?;
            let destroy: Symbol<DestroyFn> = self
                .library
                .get(DESTROY_SYMBOL)
                .map_err(|_| ModuleLoadError::MissingEntryPoint("kiln_plugin_destroy"))?;

            let destroy: DestroyFn = *destroy;
            PluginInstance::from_raw(create(), destroy)
        }
    }
}

/// Factory for modules linked into the host binary
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn Plugin> + Send + Sync>;

#[derive(Clone)]
struct StaticModule {
    descriptor: ModuleDescriptor,
    factory: Option<PluginFactory>,
    abi_version: u32,
}

/// Module table for plugins compiled into the host
///
/// Entries are keyed by file name: a file with that name on a search path
/// makes the module discoverable there, so built-in modules follow the same
/// discovery, priority and duplicate rules as dynamic libraries.
#[derive(Clone, Default)]
pub struct StaticOpener {
    modules: HashMap<String, StaticModule>,
}

impl StaticOpener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module available under `file_name`
    pub fn register<F>(&mut self, file_name: impl Into<String>, descriptor: ModuleDescriptor, factory: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.modules.insert(
            file_name.into(),
            StaticModule {
                descriptor,
                factory: Some(Arc::new(factory)),
                abi_version: KILN_ABI_VERSION,
            },
        );
    }

    /// Register a module whose binary lacks the create entry point
    pub fn register_without_factory(&mut self, file_name: impl Into<String>, descriptor: ModuleDescriptor) {
        self.modules.insert(
            file_name.into(),
            StaticModule {
                descriptor,
                factory: None,
                abi_version: KILN_ABI_VERSION,
            },
        );
    }

    /// Register a module built against another ABI version
    pub fn register_with_abi<F>(
        &mut self,
        file_name: impl Into<String>,
        descriptor: ModuleDescriptor,
        abi_version: u32,
        factory: F,
    ) where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.modules.insert(
            file_name.into(),
            StaticModule {
                descriptor,
                factory: Some(Arc::new(factory)),
                abi_version,
            },
        );
    }

    fn lookup(&self, path: &Path) -> Option<&StaticModule> {
        path.file_name()
            .and_then(OsStr::to_str)
            .and_then(|name| self.modules.get(name))
    }
}

impl ModuleOpener for StaticOpener {
    fn is_candidate(&self, path: &Path) -> bool {
        path.is_file() && self.lookup(path).is_some()
    }

    fn open(&self, path: &Path) -> Result<Box<dyn ModuleImage>, DiscoveryError> {
        let module = self
            .lookup(path)
            .ok_or_else(|| DiscoveryError::UnreadableDescriptor {
                path: path.to_path_buf(),
                reason: "not a registered module".to_string(),
            })?;

        Ok(Box::new(StaticImage {
            path: path.to_path_buf(),
            module: module.clone(),
        }))
    }
}

struct StaticImage {
    path: PathBuf,
    module: StaticModule,
}

impl ModuleImage for StaticImage {
    fn path(&self) -> &Path {
        &self.path
    }

    fn descriptor(&self) -> &ModuleDescriptor {
        &self.module.descriptor
    }

    fn instantiate(&self) -> Result<PluginInstance, ModuleLoadError> {
        if self.module.abi_version != KILN_ABI_VERSION {
            return Err(ModuleLoadError::AbiMismatch {
                expected: KILN_ABI_VERSION,
                actual: self.module.abi_version,
            });
        }
        let factory = self
            .module
            .factory
            .as_ref()
            .ok_or(ModuleLoadError::MissingEntryPoint("kiln_plugin_create"))?;
        Ok(PluginInstance::local(factory()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::api::ModuleContext;
    use crate::version::Version;
    use anyhow::Result;
    use tempfile::TempDir;

    struct Noop;

    impl Plugin for Noop {
        fn metadata(&self) -> ModuleDescriptor {
            ModuleDescriptor::new("noop", Version::new(1, 0, 0))
        }

        fn initialize(&mut self, _ctx: &ModuleContext) -> Result<()> {
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn test_dylib_candidates_by_extension() {
        let dir = TempDir::new().unwrap();
        let lib = dir
            .path()
            .join(format!("libnoop.{}", std::env::consts::DLL_EXTENSION));
        let other = dir.path().join("readme.txt");
        std::fs::write(&lib, b"").unwrap();
        std::fs::write(&other, b"").unwrap();

        let opener = DylibOpener::new();
        assert!(opener.is_candidate(&lib));
        assert!(!opener.is_candidate(&other));
        assert!(!opener.is_candidate(dir.path()));
    }

    #[test]
    fn test_dylib_open_garbage_is_discovery_error() {
        let dir = TempDir::new().unwrap();
        let lib = dir
            .path()
            .join(format!("libbroken.{}", std::env::consts::DLL_EXTENSION));
        std::fs::write(&lib, b"not a library").unwrap();

        let result = DylibOpener::new().open(&lib);
        assert!(matches!(result, Err(DiscoveryError::UnreadableDescriptor { .. })));
    }

    #[test]
    fn test_static_opener_instantiates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.kmod");
        std::fs::write(&path, b"").unwrap();

        let mut opener = StaticOpener::new();
        opener.register(
            "noop.kmod",
            ModuleDescriptor::new("noop", Version::new(1, 0, 0)),
            || Box::new(Noop),
        );

        assert!(opener.is_candidate(&path));
        let image = opener.open(&path).unwrap();
        assert_eq!(image.descriptor().id, "noop");
        let instance = image.instantiate().unwrap();
        assert_eq!(instance.metadata().id, "noop");
    }

    #[test]
    fn test_static_opener_missing_factory() {
        let mut opener = StaticOpener::new();
        opener.register_without_factory("x.kmod", ModuleDescriptor::new("x", Version::new(1, 0, 0)));
        let image = opener.open(Path::new("/nowhere/x.kmod")).unwrap();
        assert_eq!(
            image.instantiate().unwrap_err(),
            ModuleLoadError::MissingEntryPoint("kiln_plugin_create")
        );
    }

    #[test]
    fn test_static_opener_abi_mismatch() {
        let mut opener = StaticOpener::new();
        opener.register_with_abi(
            "old.kmod",
            ModuleDescriptor::new("old", Version::new(1, 0, 0)),
            KILN_ABI_VERSION + 1,
            || Box::new(Noop),
        );
        let image = opener.open(Path::new("/nowhere/old.kmod")).unwrap();
        assert!(matches!(
            image.instantiate(),
            Err(ModuleLoadError::AbiMismatch { .. })
        ));
    }
}
