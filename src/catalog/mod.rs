//! Built-in capability catalog.
//!
//! Each submodule wraps one family of developer tools. Every capability has
//! its own narrowly scoped normalizer; nothing parses output generically, so
//! a format change in one tool cannot affect another capability.
//!
//! | module      | tools                        | category           |
//! |-------------|------------------------------|--------------------|
//! | `project`   | `xcodebuild`, `nm`           | project inspection |
//! | `trace`     | `xcrun xctrace`              | performance        |
//! | `simulator` | `xcrun simctl`               | UI automation      |
//! | `ui`        | `idb`, text-recognition probe | UI automation     |

pub mod project;
pub mod simulator;
pub mod trace;
pub mod ui;

use std::time::Duration;

use tracing::info;

use crate::capabilities::{Capability, CapabilityRegistry, ProfileId, RegistryError};
use crate::config::{ServerConfig, ToolPaths};
use crate::execution::ExecutionPlan;

/// A capability paired with the profile it is registered into.
pub type Entry = (ProfileId, Capability);

/// Deadline and capture cap resolved for one capability at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanLimits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl PlanLimits {
    pub fn apply(&self, plan: ExecutionPlan) -> ExecutionPlan {
        plan.with_timeout(self.timeout)
            .with_max_output_bytes(self.max_output_bytes)
    }
}

/// Read-only view of the configuration used while building capabilities.
pub struct CatalogContext<'a> {
    config: &'a ServerConfig,
}

impl<'a> CatalogContext<'a> {
    pub fn new(config: &'a ServerConfig) -> Self {
        Self { config }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.config.tools
    }

    pub fn limits(&self, capability: &str, builtin_timeout: Option<Duration>) -> PlanLimits {
        PlanLimits {
            timeout: self.config.timeout_for(capability, builtin_timeout),
            max_output_bytes: self.config.limits.max_output_bytes,
        }
    }

    /// Limits for capabilities whose output is an image.
    pub fn image_limits(&self, capability: &str) -> PlanLimits {
        PlanLimits {
            max_output_bytes: self.config.limits.image_max_output_bytes,
            ..self.limits(capability, None)
        }
    }
}

/// Every built-in capability, in listing order.
pub fn builtin_capabilities(config: &ServerConfig) -> Result<Vec<Entry>, RegistryError> {
    let ctx = CatalogContext::new(config);
    let mut entries = project::capabilities(&ctx)?;
    entries.extend(trace::capabilities(&ctx)?);
    entries.extend(simulator::capabilities(&ctx)?);
    entries.extend(ui::capabilities(&ctx)?);
    Ok(entries)
}

/// Build the registry for `config`, applying any "minimal" re-curation.
pub fn builtin_registry(config: &ServerConfig) -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();
    for (profile, capability) in builtin_capabilities(config)? {
        registry.register(profile, capability)?;
    }
    if let Some(names) = &config.profiles.minimal {
        registry.set_minimal(names)?;
    }
    let known = registry.names(ProfileId::Full);
    if let Some(name) = config.timeouts.keys().find(|name| !known.contains(&name.as_str())) {
        return Err(RegistryError::UnknownTimeout(name.clone()));
    }
    info!(
        total = registry.len(),
        minimal = registry.names(ProfileId::Minimal).len(),
        "capability registry built"
    );
    Ok(registry)
}
