//! # Tessera Testkit
//!
//! Test utilities for the Tessera bindings.
//!
//! This crate provides:
//! - Unique array URIs and canonical dense and sparse fixtures
//! - Helpers that drive a read to completion
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_testkit::prelude::*;
//!
//! #[test]
//! fn reads_back() {
//!     let fixture = dense_1d([1, 10]);
//!     write_dense_i32(&fixture, &(1..=10).collect::<Vec<_>>()).unwrap();
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
