//! Tiered execution of compiled pipelines.
//!
//! A run always ends with an artifacts directory. The tiers are tried in
//! order and the first one that completes decides what the directory holds:
//!
//! | Tier            | Produces                                      |
//! |-----------------|-----------------------------------------------|
//! | `Full`          | metrics from training under the configured policy |
//! | `Reduced`       | metrics from training under the alternate policy  |
//! | `StructureOnly` | the structural description, no training       |
//! | `Emergency`     | placeholder records plus the captured errors  |

mod resilient;
mod tiers;

pub use resilient::{ResilientRunner, RunReport, DEFAULT_OUTPUT_DIR};
pub use tiers::{next_tier, ExecutionTierResult, TierFailure};
