//! Operating profiles.

use serde::{Deserialize, Serialize};

/// Which capability set a server run exposes. Chosen once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileId {
    /// Curated subset covering each task category with few entry points.
    #[default]
    Minimal,
    /// Every registered capability.
    Full,
}

impl ProfileId {
    pub const ALL: [ProfileId; 2] = [ProfileId::Minimal, ProfileId::Full];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileId::Minimal => "minimal",
            ProfileId::Full => "full",
        }
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised profile name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown profile '{0}' (expected 'minimal' or 'full')")]
pub struct ParseProfileError(pub String);

impl std::str::FromStr for ProfileId {
    type Err = ParseProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProfileId::ALL
            .into_iter()
            .find(|profile| profile.as_str() == wanted)
            .ok_or_else(|| ParseProfileError(s.to_string()))
    }
}
