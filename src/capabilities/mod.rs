//! # Capabilities
//!
//! A capability is the unit a caller invokes by name: an input schema, a
//! plan builder that turns validated arguments into an `ExecutionPlan`, and
//! a normalizer that turns the `RawResult` into a typed payload.
//!
//! ## Resolution flow
//!
//! 1. The catalog builds every capability and registers it with a profile tag
//! 2. Config may re-curate the "minimal" set (`CapabilityRegistry::set_minimal`)
//! 3. `CapabilityRegistry::activate(mode)` freezes the chosen projection
//! 4. The dispatch engine resolves names against the `ActiveProfile`

pub mod args;
pub mod capability;
pub mod profile;
pub mod registry;
pub mod schema;

pub use args::Args;
pub use capability::{Capability, CapabilityDescriptor, Category, NormalizeFn, PlanError, PlanFn};
pub use profile::{ParseProfileError, ProfileId};
pub use registry::{ActiveProfile, CapabilityRegistry, RegistryError};
pub use schema::{ArgSchema, ArgType, InputSchema, SchemaError};
