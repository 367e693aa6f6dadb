//! Shape descriptors for data flowing between stages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-sample dimensions of a tensor, excluding the batch dimension.
///
/// Rank 3 is spatial `(height, width, channels)`, rank 2 is a sequence
/// `(time_steps, features)` and rank 1 is a flat feature vector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Creates a shape from its dimensions. Zero-sized dimensions are clamped to 1.
    #[must_use]
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self(dims.into().into_iter().map(|d| d.max(1)).collect())
    }

    /// The conventional 28x28 single-channel image shape.
    #[must_use]
    pub fn image_default() -> Self {
        Self(vec![28, 28, 1])
    }

    /// Returns the dimensions.
    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Returns the number of elements per sample, saturating at `usize::MAX`.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.checked_element_count().unwrap_or(usize::MAX)
    }

    /// Returns the number of elements per sample, or `None` on overflow.
    #[must_use]
    pub fn checked_element_count(&self) -> Option<usize> {
        self.0.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Returns the rank-1 shape holding the same elements.
    #[must_use]
    pub fn flattened(&self) -> Self {
        Self(vec![self.element_count()])
    }

    /// Returns true for `(height, width, channels)` shapes.
    #[must_use]
    pub fn is_spatial(&self) -> bool {
        self.rank() == 3
    }

    /// Parses a comma separated list such as `28,28,1` or `(28, 28, 1)`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
        let dims: Option<Vec<usize>> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<usize>().ok().filter(|d| *d > 0))
            .collect();
        dims.filter(|d| !d.is_empty()).map(Self)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(None")?;
        for dim in &self.0 {
            write!(f, ", {dim}")?;
        }
        f.write_str(")")
    }
}
