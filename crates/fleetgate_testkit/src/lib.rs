//! # Fleetgate Testkit
//!
//! Test utilities for fleetgate.
//!
//! This crate provides:
//! - Temporary in-memory and file-backed stores
//! - Seeded rule and proposal scenarios
//! - Agent request bodies in gzip, zlib and raw deflate framing
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fleetgate_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_database() {
//!     with_temp_db(|db| {
//!         let ids = scenarios::seed_rules(db, 10);
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
