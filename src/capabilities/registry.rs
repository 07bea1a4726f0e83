//! Capability Registry: one canonical capability table, with each entry
//! tagged by the profiles it belongs to.
//!
//! The "full" profile holds every entry; "minimal" is a filtered projection
//! of the same table. Registration happens once at startup; `activate`
//! freezes the chosen projection into an [`ActiveProfile`] that is shared
//! read-only by every concurrent call.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::capability::{Capability, CapabilityDescriptor};
use super::profile::ProfileId;
use super::schema::SchemaError;

/// Startup-time registry configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("capability '{0}' registered twice")]
    Duplicate(String),

    #[error("profile '{profile}' names unknown capability '{name}'")]
    UnknownMember { profile: ProfileId, name: String },

    #[error("timeout configured for unknown capability '{0}'")]
    UnknownTimeout(String),

    #[error("capability '{name}' not found in profile '{profile}'")]
    NotFound { profile: ProfileId, name: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

struct Entry {
    capability: Arc<Capability>,
    profiles: BTreeSet<ProfileId>,
}

impl Entry {
    fn in_profile(&self, profile: ProfileId) -> bool {
        self.profiles.contains(&profile)
    }
}

/// Mutable, startup-only registry.
#[derive(Default)]
pub struct CapabilityRegistry {
    /// Insertion order is listing order.
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `capability` in `profile`.
    ///
    /// Every capability is a member of "full"; registering into "minimal"
    /// also makes it a member of "minimal". A name may be registered once.
    pub fn register(&mut self, profile: ProfileId, capability: Capability) -> Result<(), RegistryError> {
        if self.index.contains_key(&capability.name) {
            return Err(RegistryError::Duplicate(capability.name));
        }
        let mut profiles = BTreeSet::from([ProfileId::Full]);
        profiles.insert(profile);

        self.index.insert(capability.name.clone(), self.entries.len());
        self.entries.push(Entry {
            capability: Arc::new(capability),
            profiles,
        });
        Ok(())
    }

    /// Replace the curated "minimal" membership with `names`.
    ///
    /// Every name must already be registered, which keeps "minimal" a subset
    /// of "full".
    pub fn set_minimal<S: AsRef<str>>(&mut self, names: &[S]) -> Result<(), RegistryError> {
        let mut chosen = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            let idx = self.index.get(name).ok_or_else(|| RegistryError::UnknownMember {
                profile: ProfileId::Minimal,
                name: name.to_string(),
            })?;
            chosen.push(*idx);
        }
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if chosen.contains(&idx) {
                entry.profiles.insert(ProfileId::Minimal);
            } else {
                entry.profiles.remove(&ProfileId::Minimal);
            }
        }
        Ok(())
    }

    pub fn resolve(&self, profile: ProfileId, name: &str) -> Result<&Arc<Capability>, RegistryError> {
        self.index
            .get(name)
            .map(|&idx| &self.entries[idx])
            .filter(|entry| entry.in_profile(profile))
            .map(|entry| &entry.capability)
            .ok_or_else(|| RegistryError::NotFound {
                profile,
                name: name.to_string(),
            })
    }

    /// Ordered descriptors of every capability in `profile`.
    pub fn list(&self, profile: ProfileId) -> Vec<CapabilityDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.in_profile(profile))
            .map(|e| e.capability.descriptor())
            .collect()
    }

    /// Names in `profile`, in listing order.
    pub fn names(&self, profile: ProfileId) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.in_profile(profile))
            .map(|e| e.capability.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze the projection for `profile`. The registry is consumed, so no
    /// registration can happen after startup.
    pub fn activate(self, profile: ProfileId) -> ActiveProfile {
        let capabilities: Vec<Arc<Capability>> = self
            .entries
            .into_iter()
            .filter(|e| e.in_profile(profile))
            .map(|e| e.capability)
            .collect();
        let index = capabilities
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let descriptors = capabilities.iter().map(|c| c.descriptor()).collect();
        ActiveProfile {
            id: profile,
            capabilities,
            index,
            descriptors,
        }
    }
}

/// The read-only capability set of a running server.
pub struct ActiveProfile {
    id: ProfileId,
    capabilities: Vec<Arc<Capability>>,
    index: HashMap<String, usize>,
    descriptors: Vec<CapabilityDescriptor>,
}

impl ActiveProfile {
    pub fn id(&self) -> ProfileId {
        self.id
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<Capability>> {
        self.index.get(name).map(|&idx| &self.capabilities[idx])
    }

    /// Discovery listing, computed once at activation.
    pub fn list(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
