//! # Tessera FFI
//!
//! Stable C ABI over the Tessera array engine.
//!
//! This crate provides:
//! - Opaque handles with explicit `*_alloc` / `*_free` pairs
//! - Result codes and per-context last-error messages
//! - Schema, array, subarray and query calls, including query conditions
//! - Caller-owned buffers for query input and output
//!
//! Every call that can fail returns a [`TesseraResult`]. Out-values are
//! written through pointers only on success. Strings handed out by a getter
//! belong to the handle they came from.

#![warn(missing_docs)]

mod array;
mod buffer;
mod condition;
mod context;
mod error;
mod query;
mod schema;
mod subarray;
mod types;

pub use array::*;
pub use condition::*;
pub use context::*;
pub use error::{
    tessera_ctx_get_last_error, tessera_error_free, tessera_error_message, ErrorCode,
    TesseraResult,
};
pub use query::*;
pub use schema::*;
pub use subarray::*;
pub use types::{
    TesseraArray, TesseraArraySchema, TesseraAttribute, TesseraConfig, TesseraCtx,
    TesseraDimension, TesseraDomain, TesseraError, TesseraQuery, TesseraQueryCondition,
    TesseraSubarray,
};
