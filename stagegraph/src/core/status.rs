//! Execution tier enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One level of the resilient execution ladder.
///
/// Tiers are attempted in declaration order; each is entered only when the
/// one above did not fully succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Train with the configured policy and capture metrics.
    Full,
    /// Retry training once under the alternate policy.
    Reduced,
    /// Skip numeric execution, describe the pipeline only.
    StructureOnly,
    /// Write a minimal placeholder artifact. Cannot fail.
    Emergency,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Full
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Reduced => write!(f, "reduced"),
            Self::StructureOnly => write!(f, "structure_only"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

impl Tier {
    /// All tiers in attempt order.
    pub const ALL: [Self; 4] = [Self::Full, Self::Reduced, Self::StructureOnly, Self::Emergency];

    /// Returns true if the tier hands the pipeline to the compute engine for training.
    #[must_use]
    pub fn runs_training(&self) -> bool {
        matches!(self, Self::Full | Self::Reduced)
    }

    /// Returns true if this is the last tier.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Emergency)
    }
}
