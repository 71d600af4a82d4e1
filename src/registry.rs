//! Capability-keyed service registry
//!
//! The registry maps a capability id (one per service interface) to a single
//! provider. It never owns providers: it keeps a [`Weak`] reference and the
//! registering owner stays responsible for the provider's lifetime. Bindings
//! carry the owner id so that everything a module contributed can be retracted
//! in one call when the module is stopped or unloaded.

use crate::boundary::materialize_locally;
use crate::version::Version;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, warn};

/// Owner id used for services constructed by the host itself
pub const HOST_OWNER: &str = "host";

/// A service interface that can be bound in the registry
///
/// Implemented for trait objects, e.g. `impl Capability for dyn Navigation`.
pub trait Capability: Send + Sync + 'static {
    /// Registry key for this interface
    const ID: &'static str;
    /// Interface version providers are built against
    const VERSION: Version;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("capability '{capability}' is already provided by '{owner}'")]
    DuplicateCapability { capability: String, owner: String },

    #[error("capability '{capability}' version {provided} is incompatible (required {required})")]
    IncompatibleVersion {
        capability: String,
        required: Version,
        provided: Version,
    },
}

struct Binding {
    version: Version,
    owner: String,
    /// Holds a `Weak<C>` for the bound capability type
    provider: Box<dyn Any + Send + Sync>,
    alive: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Diagnostic view of one binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingInfo {
    pub capability: String,
    pub version: Version,
    pub owner: String,
    pub alive: bool,
}

/// Process-wide capability lookup table
#[derive(Default)]
pub struct ServiceRegistry {
    bindings: RwLock<HashMap<String, Binding>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `provider` for capability `C` at the interface's own version
    ///
    /// # Errors
    /// Returns `DuplicateCapability` if `C` is already bound.
    pub fn add<C: Capability + ?Sized>(
        &self,
        provider: &Arc<C>,
        owner: &str,
    ) -> Result<(), RegistryError> {
        self.add_versioned(provider, C::VERSION, owner)
    }

    /// Bind `provider` for capability `C`, declaring the provider's version
    ///
    /// # Errors
    /// - `DuplicateCapability` if `C` is already bound
    /// - `IncompatibleVersion` if `version` has a different major version than
    ///   the interface
    pub fn add_versioned<C: Capability + ?Sized>(
        &self,
        provider: &Arc<C>,
        version: Version,
        owner: &str,
    ) -> Result<(), RegistryError> {
        // Both strings may live in a plugin's memory; keep host-owned copies
        let capability = materialize_locally(&C::ID.to_string());
        let owner = materialize_locally(&owner.to_string());

        if version.major != C::VERSION.major {
            return Err(RegistryError::IncompatibleVersion {
                capability,
                required: C::VERSION,
                provided: version,
            });
        }

        let mut bindings = self.bindings.write();
        if let Some(existing) = bindings.get(&capability) {
            warn!(
                "Refusing second provider for {} (owner {}, already bound by {})",
                capability, owner, existing.owner
            );
            return Err(RegistryError::DuplicateCapability {
                capability,
                owner: existing.owner.clone(),
            });
        }

        debug!("Bound capability {} v{} for {}", capability, version, owner);
        let weak = Arc::downgrade(provider);
        let probe = weak.clone();
        bindings.insert(
            capability,
            Binding {
                version,
                owner,
                provider: Box::new(weak),
                alive: Box::new(move || probe.strong_count() > 0),
            },
        );
        Ok(())
    }

    /// Look up the provider for `C`
    ///
    /// Returns `None` when nothing is bound or the owner already dropped the
    /// provider. The returned `Arc` keeps the provider alive only for as long
    /// as the caller holds it.
    #[must_use]
    pub fn get<C: Capability + ?Sized>(&self) -> Option<Arc<C>> {
        let bindings = self.bindings.read();
        let binding = bindings.get(C::ID)?;
        binding.provider.downcast_ref::<Weak<C>>()?.upgrade()
    }

    /// Look up the provider for `C`, requiring at least version `min`
    ///
    /// # Errors
    /// Returns `IncompatibleVersion` if the bound provider is older than `min`.
    pub fn get_versioned<C: Capability + ?Sized>(
        &self,
        min: Version,
    ) -> Result<Option<Arc<C>>, RegistryError> {
        let bindings = self.bindings.read();
        let Some(binding) = bindings.get(C::ID) else {
            return Ok(None);
        };

        if binding.version < min {
            return Err(RegistryError::IncompatibleVersion {
                capability: C::ID.to_string(),
                required: min,
                provided: binding.version,
            });
        }

        Ok(binding
            .provider
            .downcast_ref::<Weak<C>>()
            .and_then(Weak::upgrade))
    }

    /// Returns true if `capability` is bound (alive or not)
    #[must_use]
    pub fn contains(&self, capability: &str) -> bool {
        self.bindings.read().contains_key(capability)
    }

    /// Version of the provider bound for `capability`
    #[must_use]
    pub fn version_of(&self, capability: &str) -> Option<Version> {
        self.bindings.read().get(capability).map(|b| b.version)
    }

    /// Remove the binding for `capability`
    pub fn remove(&self, capability: &str) -> bool {
        let removed = self.bindings.write().remove(capability).is_some();
        if removed {
            debug!("Removed capability {}", capability);
        }
        removed
    }

    /// Remove every binding registered by `owner`, returning how many were removed
    pub fn remove_all_for_owner(&self, owner: &str) -> usize {
        let mut bindings = self.bindings.write();
        let before = bindings.len();
        bindings.retain(|_, binding| binding.owner != owner);
        let removed = before - bindings.len();
        if removed > 0 {
            debug!("Removed {} capability binding(s) owned by {}", removed, owner);
        }
        removed
    }

    /// Snapshot of all bindings, sorted by capability id
    #[must_use]
    pub fn bindings(&self) -> Vec<BindingInfo> {
        let bindings = self.bindings.read();
        let mut out: Vec<BindingInfo> = bindings
            .iter()
            .map(|(capability, binding)| BindingInfo {
                capability: capability.clone(),
                version: binding.version,
                owner: binding.owner.clone(),
                alive: (binding.alive)(),
            })
            .collect();
        out.sort_by(|a, b| a.capability.cmp(&b.capability));
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("bindings", &self.len())
            .finish()
    }
}
