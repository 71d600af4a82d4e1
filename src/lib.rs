//! Kiln - a host runtime for independently built plugin modules
//!
//! Modules are dynamic libraries discovered in known directories. The host
//! reads their descriptors, drives them through a lifecycle, and brokers
//! access to shared services through a capability registry.
//!
//! # Modules
//!
//! - [`boundary`]: values copied into host-owned memory at module boundaries
//! - [`registry`]: capability-keyed service registry
//! - [`plugins`]: module ABI, loader and lifecycle manager
//! - [`services`]: navigation, menu, settings, theme, logger and event bus
//! - [`host`]: the root context wiring everything together
//! - [`config`]: configuration and SDK directory layout

pub mod boundary;
pub mod config;
pub mod host;
pub mod plugins;
pub mod registry;
pub mod services;
pub mod version;

pub use host::{BootReport, HeadlessEngine, HostContext};
pub use registry::{Capability, ServiceRegistry};
pub use version::Version;
