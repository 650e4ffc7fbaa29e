//! # Tessera Engine
//!
//! In-memory multidimensional array engine behind the Tessera C ABI.
//!
//! This crate provides:
//! - The datatype registry and ABI enumerations
//! - Array schemas: dimensions, domains, attributes, dimension labels
//! - A process-wide array store with immutable fragments and metadata
//! - Subarrays with range coalescing and out-of-bounds policies
//! - Read and write queries with incomplete-result resumption
//! - Query conditions filtering read results
//! - Timestamped fragments and time-travel opens
//! - Process-wide statistics

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod array;
pub mod condition;
pub mod config;
pub mod error;
pub mod query;
pub mod scalar;
pub mod schema;
pub mod stats;
pub mod store;
pub mod subarray;
pub mod types;

pub use array::{create_array, Array};
pub use condition::{CompiledCondition, QueryCondition};
pub use config::{EngineConfig, OobPolicy};
pub use error::{EngineError, EngineResult};
pub use query::{CancelToken, FieldInput, FieldOutput, FieldShape, FieldSizes, Query};
pub use schema::{ArraySchema, Attribute, Dimension, DimensionLabel, Domain, Field};
pub use stats::{EngineStats, StatsSnapshot};
pub use store::{Fragment, MetadataValue, Store};
pub use subarray::{RangeBytes, Subarray};
pub use types::{
    ArrayType, CombinationOp, ConditionOp, DataOrder, Datatype, Layout, QueryStatus, QueryType,
    ScalarClass, StatusReason, COORDS, VAR_NUM,
};
