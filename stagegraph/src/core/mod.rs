//! Core domain model types for stagegraph.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Shape descriptors
//! - The execution tier enum

mod shape;
mod status;

pub use shape::Shape;
pub use status::Tier;
