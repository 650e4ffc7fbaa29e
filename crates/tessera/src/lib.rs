//! # Tessera
//!
//! Safe client bindings for the Tessera multidimensional array engine.
//!
//! Every object here wraps one native handle obtained through the engine's
//! C ABI. This crate provides:
//! - A datatype registry mapping engine tags to typed buffers
//! - Reference-counted native handles released exactly once
//! - Buffer bindings that keep caller memory alive while the engine holds it
//! - Typed ranges and subarrays
//! - Queries driving the incomplete-result protocol
//! - Query conditions, dimension labels and timestamped array opens
//! - Schemas, arrays, metadata, configuration and statistics
//!
//! ```no_run
//! use tessera::{
//!     Array, ArraySchema, ArrayType, Attribute, Context, Datatype, Dimension, Domain, Query,
//!     QueryType,
//! };
//!
//! # fn main() -> tessera::Result<()> {
//! let ctx = Context::new(None)?;
//! let domain = Domain::new(&ctx)?;
//! domain.add_dimension(&Dimension::new(&ctx, "d", Datatype::Int32, [1, 4], None)?)?;
//! let schema = ArraySchema::new(&ctx, ArrayType::Dense)?;
//! schema.set_domain(&domain)?;
//! schema.add_attribute(&Attribute::new(&ctx, "a", Datatype::Float64)?)?;
//!
//! let array = Array::new(&ctx, "mem://quickstart")?;
//! array.create(&schema)?;
//! array.open(QueryType::Write)?;
//! let query = Query::new(&array, QueryType::Write)?;
//! query.set_data_buffer("a", vec![0.5, 1.5, 2.5, 3.5])?;
//! query.submit()?;
//! array.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod array;
mod buffer;
mod condition;
mod config;
mod context;
mod datatype;
mod error;
mod handle;
mod non_empty;
mod query;
mod range;
mod schema;
pub mod stats;
mod subarray;
mod types;
mod value;

pub use array::Array;
pub use buffer::{BoundBuffer, NativeBuffer};
pub use condition::QueryCondition;
pub use config::Config;
pub use context::Context;
pub use datatype::{Datatype, Element, TypedBuffer, ValueKind, COORDS, VAR_NUM};
pub use error::{Error, Result};
pub use handle::{HandleGuard, NativeHandle, ReleaseFn};
pub use non_empty::{Bounds, NonEmptyDomain, NonEmptyDomains};
pub use query::{
    FieldInfo, Query, QueryBufferEntry, QueryBufferSet, ResultSize, Slot, OFFSET_SIZE,
};
pub use range::{Range, RangeType};
pub use schema::{ArraySchema, Attribute, Dimension, DimensionLabel, Domain};
pub use subarray::Subarray;
pub use types::{
    ArrayType, CombinationOp, ConditionOp, DataOrder, Layout, QueryStatus, QueryType, StatusReason,
};
pub use value::MetadataValue;
