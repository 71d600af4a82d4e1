//! Plugin API definitions
//!
//! Everything a module needs to be loadable by the host: the lifecycle trait,
//! the context handed to `initialize`, and the C entry points generated by
//! [`declare_plugin!`](crate::declare_plugin).

use super::descriptor::ModuleDescriptor;
use crate::registry::{Capability, RegistryError, ServiceRegistry};
use crate::version::Version;
use anyhow::Result;
use std::ffi::c_void;
use std::sync::Arc;

/// Current plugin ABI version. Modules built against another version are
/// refused at load time.
pub const KILN_ABI_VERSION: u32 = 1;

/// `extern "C" fn() -> u32`
pub const ABI_VERSION_SYMBOL: &[u8] = b"kiln_plugin_abi_version\0";
/// `extern "C" fn() -> RawStr`
pub const DESCRIPTOR_SYMBOL: &[u8] = b"kiln_plugin_descriptor\0";
/// `extern "C" fn() -> *mut c_void`
pub const CREATE_SYMBOL: &[u8] = b"kiln_plugin_create\0";
/// `unsafe extern "C" fn(*mut c_void)`
pub const DESTROY_SYMBOL: &[u8] = b"kiln_plugin_destroy\0";

pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
pub type DescriptorFn = unsafe extern "C" fn() -> RawStr;
pub type CreateFn = unsafe extern "C" fn() -> *mut c_void;
pub type DestroyFn = unsafe extern "C" fn(*mut c_void);

/// Borrowed UTF-8 text with static lifetime inside the module binary
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawStr {
    #[must_use]
    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// Copy the text into a host-owned `String`
    ///
    /// # Safety
    /// `ptr` must point to `len` readable bytes that stay valid for the call.
    pub unsafe fn to_local_string(&self) -> Option<String> {
        if self.ptr.is_null() {
            return None;
        }
        // SAFETY: caller guarantees ptr/len describe readable memory
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        std::str::from_utf8(bytes).ok().map(str::to_owned)
    }
}

/// Lifecycle contract every module root object implements
pub trait Plugin: Send {
    /// Descriptor of this module; must carry the same id as the embedded one
    fn metadata(&self) -> ModuleDescriptor;

    /// Register services and look up host services
    ///
    /// A capability the module requires may still be absent here; modules are
    /// expected to degrade rather than fail.
    fn initialize(&mut self, ctx: &ModuleContext) -> Result<()>;

    /// Begin live operation: register routes, menu entries, subscriptions
    fn start(&mut self) -> Result<()>;

    /// Stop live operation. Bindings are retracted by the host afterwards.
    fn stop(&mut self);
}

/// Handle given to a module during `initialize`
///
/// Bindings made through [`ModuleContext::provide`] are attributed to the
/// module, so the host can retract all of them when the module goes away.
#[derive(Clone)]
pub struct ModuleContext {
    registry: Arc<ServiceRegistry>,
    owner: String,
}

impl ModuleContext {
    #[must_use]
    pub fn new(registry: Arc<ServiceRegistry>, owner: impl Into<String>) -> Self {
        Self {
            registry,
            owner: owner.into(),
        }
    }

    /// The module id bindings are attributed to
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Publish a capability on behalf of this module
    ///
    /// # Errors
    /// Propagates `DuplicateCapability` / `IncompatibleVersion` from the registry
    pub fn provide<C: Capability + ?Sized>(&self, provider: &Arc<C>) -> Result<(), RegistryError> {
        self.registry.add(provider, &self.owner)
    }

    /// Publish a capability with an explicit provider version
    ///
    /// # Errors
    /// Propagates registry errors
    pub fn provide_versioned<C: Capability + ?Sized>(
        &self,
        provider: &Arc<C>,
        version: Version,
    ) -> Result<(), RegistryError> {
        self.registry.add_versioned(provider, version, &self.owner)
    }

    /// Look up a capability
    #[must_use]
    pub fn get<C: Capability + ?Sized>(&self) -> Option<Arc<C>> {
        self.registry.get::<C>()
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Convert a plugin box to a raw pointer for the C entry point
///
/// The trait object is boxed a second time so that a thin pointer can cross
/// the C ABI.
#[must_use]
pub fn plugin_into_raw(plugin: Box<dyn Plugin>) -> *mut c_void {
    let boxed: Box<Box<dyn Plugin>> = Box::new(plugin);
    Box::into_raw(boxed).cast::<c_void>()
}

/// Destroy a plugin created by [`plugin_into_raw`]
///
/// Must run inside the binary that created the plugin so that its own
/// allocator frees the memory; `declare_plugin!` exports it for that reason.
///
/// # Safety
/// `ptr` must come from `plugin_into_raw` in the same binary and must not be
/// used afterwards.
pub unsafe fn plugin_destroy_raw(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: caller guarantees ptr was produced by plugin_into_raw
    drop(unsafe { Box::from_raw(ptr.cast::<Box<dyn Plugin>>()) });
}

/// Local destroy function for plugins created inside the host binary
///
/// # Safety
/// Same contract as [`plugin_destroy_raw`].
pub unsafe extern "C" fn destroy_local_plugin(ptr: *mut c_void) {
    // SAFETY: forwarded contract
    unsafe { plugin_destroy_raw(ptr) }
}

/// Export the module entry points the host looks for
///
/// ```ignore
/// kiln::declare_plugin!(include_str!("../plugin.json"), || Box::new(RulesPlugin::new()));
/// ```
#[macro_export]
macro_rules! declare_plugin {
    ($descriptor:expr, $ctor:expr $(,)?) => {
        #[no_mangle]
        pub extern "C" fn kiln_plugin_abi_version() -> u32 {
            $crate::plugins::KILN_ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn kiln_plugin_descriptor() -> $crate::plugins::RawStr {
            static KILN_DESCRIPTOR_JSON: &str = $descriptor;
            $crate::plugins::RawStr::from_static(KILN_DESCRIPTOR_JSON)
        }

        #[no_mangle]
        pub extern "C" fn kiln_plugin_create() -> *mut ::std::ffi::c_void {
            let ctor: fn() -> ::std::boxed::Box<dyn $crate::plugins::Plugin> = $ctor;
            $crate::plugins::plugin_into_raw(ctor())
        }

        /// # Safety
        /// `ptr` must come from `kiln_plugin_create` of this module.
        #[no_mangle]
        pub unsafe extern "C" fn kiln_plugin_destroy(ptr: *mut ::std::ffi::c_void) {
            unsafe { $crate::plugins::plugin_destroy_raw(ptr) }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Probe(Arc<AtomicBool>);

    impl Plugin for Probe {
        fn metadata(&self) -> ModuleDescriptor {
            ModuleDescriptor::new("probe", Version::new(1, 0, 0))
        }

        fn initialize(&mut self, _ctx: &ModuleContext) -> Result<()> {
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) {}
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_raw_round_trip_drops_plugin() {
        let dropped = Arc::new(AtomicBool::new(false));
        let raw = plugin_into_raw(Box::new(Probe(dropped.clone())));
        assert!(!raw.is_null());
        unsafe { destroy_local_plugin(raw) };
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_raw_str_copy() {
        let raw = RawStr::from_static("{\"id\":\"x\"}");
        assert_eq!(unsafe { raw.to_local_string() }.as_deref(), Some("{\"id\":\"x\"}"));
        let null = RawStr {
            ptr: std::ptr::null(),
            len: 0,
        };
        assert_eq!(unsafe { null.to_local_string() }, None);
    }

    #[test]
    fn test_context_attributes_owner() {
        trait Marker: Send + Sync {}
        impl Capability for dyn Marker {
            const ID: &'static str = "Marker";
            const VERSION: Version = Version::new(1, 0, 0);
        }
        struct M;
        impl Marker for M {}

        let registry = Arc::new(ServiceRegistry::new());
        let ctx = ModuleContext::new(registry.clone(), "com.example.marker");
        let marker: Arc<dyn Marker> = Arc::new(M);
        ctx.provide(&marker).unwrap();

        assert!(ctx.get::<dyn Marker>().is_some());
        assert_eq!(registry.remove_all_for_owner("com.example.marker"), 1);
    }
}
