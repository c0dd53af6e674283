//! # DocSync Testkit
//!
//! Test utilities for DocSync replication.
//!
//! This crate provides:
//! - A harness wiring a database to a manually pumped background context
//!   and a scripted engine factory
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_harness() {
//!     with_harness(|h| {
//!         let mut session = h.pull_session();
//!         session.start();
//!         h.pump(&mut session);
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
