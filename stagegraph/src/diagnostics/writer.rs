//! Artifact directory layout.
//!
//! ```text
//! <output-dir>/<YYYYmmdd-HHMMSS>-<run-id-prefix>/
//!     structure/{summary.txt, pipeline.json, pipeline.dot}
//!     metrics/{metrics.json, graph.json}
//!     emergency/{placeholder.json, error.txt}
//!     manifest.json
//!     READY
//! ```
//!
//! Areas are created lazily. `READY` is always written last.

use super::RunManifest;
use crate::context::RunContext;
use crate::engine::{StructuralDescription, TrainingOutcome};
use crate::errors::DiagnosticsError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Structural summary area.
pub const STRUCTURE_DIR: &str = "structure";
/// Training metrics area.
pub const METRICS_DIR: &str = "metrics";
/// Emergency records area.
pub const EMERGENCY_DIR: &str = "emergency";
/// Manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Ready marker file name.
pub const READY_FILE: &str = "READY";

/// Writes one run's artifacts.
#[derive(Debug, Clone)]
pub struct DiagnosticsWriter {
    output_dir: PathBuf,
    artifacts_dir: PathBuf,
}

impl DiagnosticsWriter {
    /// Creates a writer for this run under `output_dir`.
    ///
    /// Relative output directories are resolved against the working
    /// directory so that every reported path is absolute.
    #[must_use]
    pub fn new(output_dir: &Path, ctx: &RunContext) -> Self {
        let output_dir = absolute(output_dir);
        let artifacts_dir = output_dir.join(ctx.run_dir_name());
        Self {
            output_dir,
            artifacts_dir,
        }
    }

    /// Returns the absolute output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns the absolute artifacts directory.
    #[must_use]
    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Writes the structural summary. Returns the relative paths written.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError`] if a file cannot be written.
    pub fn write_structure(&self, description: &StructuralDescription) -> Result<Vec<String>, DiagnosticsError> {
        let summary = self.write_text(STRUCTURE_DIR, "summary.txt", &description.summary)?;
        let stages = self.write_json(STRUCTURE_DIR, "pipeline.json", &description.stages)?;
        let dot = self.write_text(STRUCTURE_DIR, "pipeline.dot", &description.dot)?;
        Ok(vec![summary, stages, dot])
    }

    /// Writes training metrics and the trained graph, if any.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError`] if a file cannot be written.
    pub fn write_metrics(&self, outcome: &TrainingOutcome) -> Result<Vec<String>, DiagnosticsError> {
        let mut written = vec![self.write_json(METRICS_DIR, "metrics.json", &outcome.metrics)?];
        if let Some(graph) = &outcome.graph {
            written.push(self.write_json(METRICS_DIR, "graph.json", graph)?);
        }
        Ok(written)
    }

    /// Writes the placeholder records and the captured error message.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError`] if a file cannot be written.
    pub fn write_emergency(&self, message: &str, count: usize, seed: u64) -> Result<Vec<String>, DiagnosticsError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let records: Vec<_> = (0..count)
            .map(|step| json!({"tag": "custom_metric", "step": step, "value": rng.gen::<f64>()}))
            .collect();
        let placeholder = self.write_json(EMERGENCY_DIR, "placeholder.json", &records)?;
        let error = self.write_text(EMERGENCY_DIR, "error.txt", message)?;
        Ok(vec![placeholder, error])
    }

    /// Writes the manifest, then the ready marker. Returns the artifacts directory.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError`] if either file cannot be written.
    pub fn persist(&self, manifest: &RunManifest) -> Result<PathBuf, DiagnosticsError> {
        self.write_json("", MANIFEST_FILE, manifest)?;
        let marker = self.artifacts_dir.display().to_string();
        self.write_text("", READY_FILE, &marker)?;
        info!(artifacts_dir = %marker, final_tier = %manifest.final_tier, "Artifacts ready");
        Ok(self.artifacts_dir.clone())
    }

    fn write_json<T: Serialize + ?Sized>(&self, area: &str, name: &str, value: &T) -> Result<String, DiagnosticsError> {
        let text = serde_json::to_string_pretty(value)?;
        self.write_text(area, name, &text)
    }

    fn write_text(&self, area: &str, name: &str, text: &str) -> Result<String, DiagnosticsError> {
        let dir = self.artifacts_dir.join(area);
        fs::create_dir_all(&dir).map_err(|e| DiagnosticsError::io(&dir, e))?;
        let path = dir.join(name);
        fs::write(&path, text).map_err(|e| DiagnosticsError::io(&path, e))?;
        debug!(path = %path.display(), bytes = text.len(), "Wrote artifact");
        Ok(if area.is_empty() {
            name.to_string()
        } else {
            format!("{area}/{name}")
        })
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}
