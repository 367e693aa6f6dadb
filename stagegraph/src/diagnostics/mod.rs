//! Artifact persistence.
//!
//! The [`DiagnosticsWriter`] owns the on-disk layout of one run; the
//! [`LinkOrCopy`] collaborator maintains the optional "latest" pointer.

mod link;
mod manifest;
mod writer;

pub use link::{FsLinker, LinkKind, LinkOrCopy};
pub use manifest::RunManifest;
pub use writer::{
    DiagnosticsWriter, EMERGENCY_DIR, MANIFEST_FILE, METRICS_DIR, READY_FILE, STRUCTURE_DIR,
};

#[cfg(test)]
pub use link::MockLinkOrCopy;
