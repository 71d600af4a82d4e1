// Plugin runtime: module binaries loaded with libloading
// - descriptors read before any module code runs
// - instances created and destroyed by the module's own entry points
// - lifecycle phases isolated per module
pub mod api;
pub mod descriptor;
pub mod error;
pub mod loader;
pub mod manager;
pub mod ordering;

pub use api::{
    destroy_local_plugin, plugin_destroy_raw, plugin_into_raw, ModuleContext, Plugin, RawStr,
    KILN_ABI_VERSION,
};
pub use descriptor::{ModuleDescriptor, Requirement, RequirementKind, DEFAULT_PRIORITY};
pub use error::{DiscoveryError, LifecycleError, ModuleLoadError};
pub use loader::{DylibOpener, ModuleImage, ModuleOpener, PluginInstance, StaticOpener};
pub use manager::{ModuleRecord, ModuleState, ModuleSummary, PluginManager};
pub use ordering::OrderingPolicy;
