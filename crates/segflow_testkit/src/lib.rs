//! # Segflow Testkit
//!
//! Test utilities for Segflow.
//!
//! This crate provides:
//! - Fixtures: engines rooted in temporary directories and stores with
//!   known key layouts
//! - Property-based test generators using proptest
//! - Stress helpers that hammer the block cache and byte budget from many
//!   threads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use segflow_testkit::prelude::*;
//!
//! #[test]
//! fn sorts_shuffled_ranges() {
//!     let engine = TestEngine::new();
//!     let input = disjoint_shuffled_store(&[0..25, 25..50], 7);
//!     // ... run a sort
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
