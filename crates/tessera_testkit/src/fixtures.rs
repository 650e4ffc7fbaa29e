//! Test fixtures and array helpers.
//!
//! Every fixture creates a fresh array under a unique `mem://` URI, so tests
//! can run in parallel against the process-wide engine store.

use std::sync::Once;

use tessera::{
    Array, ArraySchema, ArrayType, Attribute, Context, DataOrder, Datatype, Dimension, Domain,
    Element, Query, QueryStatus, QueryType, Result, VAR_NUM,
};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a `fmt` subscriber for tests, once per process.
///
/// The filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Returns `mem://{prefix}/{uuid}`.
pub fn unique_uri(prefix: &str) -> String {
    format!("mem://{prefix}/{}", uuid::Uuid::new_v4())
}

/// A created, closed array and the context it belongs to.
pub struct TestArray {
    /// The context.
    pub ctx: Context,
    /// The array handle.
    pub array: Array,
    /// The array URI.
    pub uri: String,
}

impl TestArray {
    /// Creates an array from `schema` under a unique URI.
    pub fn create(ctx: Context, prefix: &str, schema: &ArraySchema) -> Self {
        let uri = unique_uri(prefix);
        let array = Array::new(&ctx, &uri).expect("Failed to allocate array");
        array.create(schema).expect("Failed to create array");
        Self { ctx, array, uri }
    }

    /// Opens a second handle on the same array.
    pub fn reopen_handle(&self) -> Array {
        Array::new(&self.ctx, &self.uri).expect("Failed to allocate array")
    }
}

impl std::ops::Deref for TestArray {
    type Target = Array;

    fn deref(&self) -> &Self::Target {
        &self.array
    }
}

fn schema(
    ctx: &Context,
    array_type: ArrayType,
    dims: &[Dimension],
    attrs: &[Attribute],
) -> ArraySchema {
    let domain = Domain::new(ctx).expect("Failed to allocate domain");
    domain.add_dimensions(dims).expect("Failed to add dimensions");
    let schema = ArraySchema::new(ctx, array_type).expect("Failed to allocate schema");
    schema.set_domain(&domain).expect("Failed to set domain");
    schema.add_attributes(attrs).expect("Failed to add attributes");
    schema.check().expect("Fixture schema is invalid");
    schema
}

/// A dense array with one `Int32` dimension `d` over `domain` and one
/// `Int32` attribute `a`.
pub fn dense_1d(domain: [i32; 2]) -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let d = Dimension::new(&ctx, "d", Datatype::Int32, domain, None)
        .expect("Failed to create dimension");
    let a = Attribute::new(&ctx, "a", Datatype::Int32).expect("Failed to create attribute");
    let schema = schema(&ctx, ArrayType::Dense, &[d], &[a]);
    TestArray::create(ctx, "dense-1d", &schema)
}

/// [`dense_1d`] over `[1, 4]` with two labels on `d`: an increasing
/// `StringAscii` label `d_name` and a decreasing `Float64` label `d_pos`.
pub fn dense_labelled() -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let d = Dimension::new(&ctx, "d", Datatype::Int32, [1, 4], None)
        .expect("Failed to create dimension");
    let a = Attribute::new(&ctx, "a", Datatype::Int32).expect("Failed to create attribute");
    let schema = schema(&ctx, ArrayType::Dense, &[d], &[a]);
    schema
        .add_dimension_label(0, "d_name", DataOrder::Increasing, Datatype::StringAscii)
        .expect("Failed to add dimension label");
    schema
        .add_dimension_label(0, "d_pos", DataOrder::Decreasing, Datatype::Float64)
        .expect("Failed to add dimension label");
    TestArray::create(ctx, "dense-labelled", &schema)
}

/// A 4x4 dense array over `rows` and `cols` (both `Int32`, `[1, 4]`) with
/// an `Int32` attribute `a` filled with -1 where unwritten.
pub fn dense_2d() -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let rows = Dimension::new(&ctx, "rows", Datatype::Int32, [1, 4], Some(2))
        .expect("Failed to create dimension");
    let cols = Dimension::new(&ctx, "cols", Datatype::Int32, [1, 4], Some(2))
        .expect("Failed to create dimension");
    let a = Attribute::new(&ctx, "a", Datatype::Int32).expect("Failed to create attribute");
    a.set_fill_value(&[-1i32]).expect("Failed to set fill value");
    let schema = schema(&ctx, ArrayType::Dense, &[rows, cols], &[a]);
    TestArray::create(ctx, "dense-2d", &schema)
}

/// A sparse array over `x` (`Int64`, `[0, 999]`) with a nullable var-sized
/// `StringUtf8` attribute `label` and a `Float64` attribute `score`.
pub fn sparse_labels() -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let x = Dimension::new(&ctx, "x", Datatype::Int64, [0i64, 999], None)
        .expect("Failed to create dimension");
    let label = Attribute::new(&ctx, "label", Datatype::StringUtf8)
        .expect("Failed to create attribute");
    label.set_cell_val_num(VAR_NUM).expect("Failed to make attribute var-sized");
    label.set_nullable(true).expect("Failed to make attribute nullable");
    let score = Attribute::new(&ctx, "score", Datatype::Float64)
        .expect("Failed to create attribute");
    let schema = schema(&ctx, ArrayType::Sparse, &[x], &[label, score]);
    TestArray::create(ctx, "sparse-labels", &schema)
}

/// A sparse array over a string dimension `key` and an `Int64` dimension
/// `t` (`[0, 99]`) with an `Int32` attribute `v`.
pub fn sparse_keys() -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let key = Dimension::new_string(&ctx, "key", Datatype::StringAscii)
        .expect("Failed to create dimension");
    let t = Dimension::new(&ctx, "t", Datatype::Int64, [0i64, 99], None)
        .expect("Failed to create dimension");
    let v = Attribute::new(&ctx, "v", Datatype::Int32).expect("Failed to create attribute");
    let schema = schema(&ctx, ArrayType::Sparse, &[key, t], &[v]);
    TestArray::create(ctx, "sparse-keys", &schema)
}

/// A sparse array over two `Int32` dimensions `i` and `j` (`[0, 9]`) with
/// a `Float32` attribute `v`, so `__coords` can be bound.
pub fn sparse_grid() -> TestArray {
    let ctx = Context::new(None).expect("Failed to create context");
    let i = Dimension::new(&ctx, "i", Datatype::Int32, [0, 9], None)
        .expect("Failed to create dimension");
    let j = Dimension::new(&ctx, "j", Datatype::Int32, [0, 9], None)
        .expect("Failed to create dimension");
    let v = Attribute::new(&ctx, "v", Datatype::Float32).expect("Failed to create attribute");
    let schema = schema(&ctx, ArrayType::Sparse, &[i, j], &[v]);
    TestArray::create(ctx, "sparse-grid", &schema)
}

/// Writes `values` over the whole domain of a one-attribute dense array.
pub fn write_dense_i32(array: &Array, values: &[i32]) -> Result<()> {
    array.open(QueryType::Write)?;
    let query = Query::new(array, QueryType::Write)?;
    query.set_data_buffer("a", values.to_vec())?;
    query.submit()?;
    array.close()
}

/// Encodes strings as `(offsets, data)` buffers.
pub fn encode_strings<S: AsRef<str>>(values: &[S]) -> (Vec<u64>, Vec<u8>) {
    let mut offsets = Vec::with_capacity(values.len());
    let mut data = Vec::new();
    for value in values {
        offsets.push(data.len() as u64);
        data.extend_from_slice(value.as_ref().as_bytes());
    }
    (offsets, data)
}

/// Submits `query` until it completes, collecting the values of `name`.
///
/// Returns the values and the number of submissions.
pub fn read_to_end<T: Element>(query: &Query, name: &str) -> Result<(Vec<T>, usize)> {
    let mut values = Vec::new();
    let mut submissions = 0;
    loop {
        let status = query.submit()?;
        submissions += 1;
        values.extend(query.result_data::<T>(name)?);
        if status != QueryStatus::Incomplete {
            return Ok((values, submissions));
        }
    }
}
