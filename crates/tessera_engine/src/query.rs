//! Query execution.
//!
//! Writes turn caller buffers into cells and commit them as fragments
//! (immediately, or at [`Query::finalize`] for global-order writes). Reads
//! walk a result set with a cursor so a submission that runs out of buffer
//! space or memory budget can be resumed by submitting again.
//!
//! Only whole cells are ever delivered: if the next cell does not fit every
//! buffer, the submission stops before it.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::array::Array;
use crate::condition::{CompiledCondition, QueryCondition};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::scalar::{cmp_keys, Scalar};
use crate::schema::{ArraySchema, DimensionLabel, Field};
use crate::stats;
use crate::store::{Cell, CellValue, Fragment, FragmentData, LabelValue, Snapshot, StoredArray};
use crate::subarray::Subarray;
use crate::types::{
    ArrayType, DataOrder, Datatype, Layout, QueryStatus, QueryType, StatusReason,
};

/// How often long loops look for cancellation.
const CANCEL_CHECK_INTERVAL: u128 = 1024;

/// Cancellation shared by every query of one context.
#[derive(Debug, Default)]
pub struct CancelToken {
    epoch: AtomicU64,
}

impl CancelToken {
    /// Creates a token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every submission currently running under this token.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

/// Shape a field's buffers must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldShape {
    /// Datatype of the data buffer's values.
    pub datatype: Datatype,
    /// Whether an offsets buffer is required.
    pub var: bool,
    /// Whether a validity buffer is required.
    pub nullable: bool,
}

/// Buffers supplying one field of a write.
#[derive(Debug, Clone, Copy)]
pub struct FieldInput<'a> {
    /// Values, back to back.
    pub data: &'a [u8],
    /// Byte offset of each cell in `data`, for var-sized fields.
    pub offsets: Option<&'a [u64]>,
    /// One byte per cell, non-zero meaning valid.
    pub validity: Option<&'a [u8]>,
}

/// Buffers receiving one field of a read.
#[derive(Debug)]
pub struct FieldOutput<'a> {
    /// Values, back to back.
    pub data: &'a mut [u8],
    /// Byte offset of each cell in `data`, for var-sized fields.
    pub offsets: Option<&'a mut [u64]>,
    /// One byte per cell, non-zero meaning valid.
    pub validity: Option<&'a mut [u8]>,
}

/// Bytes used in each buffer of one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldSizes {
    /// Bytes of values.
    pub data: u64,
    /// Bytes of offsets.
    pub offsets: u64,
    /// Bytes of validity.
    pub validity: u64,
}

impl FieldSizes {
    fn total(&self) -> u64 {
        self.data + self.offsets + self.validity
    }
}

/// A dense traversal over the cross product of per-dimension ranges.
#[derive(Debug, Clone)]
struct DenseGrid {
    ranges: Vec<Vec<(i128, i128)>>,
    lens: Vec<u128>,
    total: u128,
    col_major: bool,
}

impl DenseGrid {
    fn new(ranges: Vec<Vec<(i128, i128)>>, col_major: bool) -> Self {
        let lens: Vec<u128> = ranges
            .iter()
            .map(|rs| rs.iter().map(|(lo, hi)| (hi - lo + 1) as u128).sum())
            .collect();
        let total = lens.iter().product();
        Self {
            ranges,
            lens,
            total,
            col_major,
        }
    }

    fn coords_at(&self, mut position: u128) -> Vec<i128> {
        let n = self.lens.len();
        let mut coords = vec![0i128; n];
        for step in 0..n {
            let dim = if self.col_major { step } else { n - 1 - step };
            let len = self.lens[dim];
            coords[dim] = self.value_at(dim, position % len);
            position /= len;
        }
        coords
    }

    fn value_at(&self, dim: usize, mut index: u128) -> i128 {
        for (lo, hi) in &self.ranges[dim] {
            let span = (hi - lo + 1) as u128;
            if index < span {
                return lo + index as i128;
            }
            index -= span;
        }
        self.ranges[dim].last().map_or(0, |(_, hi)| *hi)
    }
}

#[derive(Debug)]
enum ResultSet {
    Dense(DenseGrid),
    /// (fragment index, cell index) pairs in delivery order.
    Sparse(Vec<(usize, usize)>),
}

impl ResultSet {
    fn len(&self) -> u128 {
        match self {
            Self::Dense(grid) => grid.total,
            Self::Sparse(refs) => refs.len() as u128,
        }
    }
}

#[derive(Debug)]
struct ReadCursor {
    results: ResultSet,
    position: u128,
}

/// One result cell: its coordinates and its values (`None` when unwritten).
struct CellView<'a> {
    coords: Cow<'a, [Vec<u8>]>,
    values: Option<&'a [CellValue]>,
}

/// Label values seen by one query, keyed by encoded coordinate.
type LabelMap<'a> = HashMap<&'a [u8], &'a [u8]>;

#[derive(Debug, Default)]
struct GlobalWrite {
    pending: FragmentData,
    last_key: Option<Vec<Scalar>>,
    dense_written: u128,
}

/// A read or write query against an opened array.
#[derive(Debug)]
pub struct Query {
    stored: Arc<StoredArray>,
    schema: Arc<ArraySchema>,
    snapshot: Snapshot,
    query_type: QueryType,
    layout: Layout,
    subarray: Subarray,
    config: EngineConfig,
    condition: Option<(QueryCondition, CompiledCondition)>,
    timestamp: Option<u64>,
    cancel: Arc<CancelToken>,
    status: QueryStatus,
    reason: StatusReason,
    cursor: Option<ReadCursor>,
    last_sizes: HashMap<String, FieldSizes>,
    global: GlobalWrite,
    written: Vec<Arc<Fragment>>,
    finalized: bool,
}

impl Query {
    /// Creates a query in the mode `array` was opened in.
    pub fn new(
        array: &Array,
        config: EngineConfig,
        cancel: Arc<CancelToken>,
    ) -> EngineResult<Self> {
        let query_type = array.query_type()?;
        let stored = Arc::clone(array.stored()?);
        let schema = Arc::clone(stored.schema());
        let subarray = Subarray::new(Arc::clone(&schema), config.clone())?;
        let layout = match (schema.array_type(), query_type) {
            (ArrayType::Sparse, QueryType::Write) => Layout::Unordered,
            _ => Layout::RowMajor,
        };
        Ok(Self {
            snapshot: array.snapshot()?.clone(),
            stored,
            schema,
            query_type,
            layout,
            subarray,
            config,
            condition: None,
            timestamp: array.timestamp()?,
            cancel,
            status: QueryStatus::Uninitialized,
            reason: StatusReason::None,
            cursor: None,
            last_sizes: HashMap::new(),
            global: GlobalWrite::default(),
            written: Vec::new(),
            finalized: false,
        })
    }

    /// Returns read or write.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Returns the cell order of the query.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Returns the schema of the queried array.
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// Returns the current status.
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Returns why the last read stopped early.
    pub fn status_reason(&self) -> StatusReason {
        self.reason
    }

    /// Returns true if the last read delivered any bytes.
    pub fn has_results(&self) -> bool {
        self.last_sizes.values().any(|s| s.total() > 0)
    }

    /// Sets the cell order.
    pub fn set_layout(&mut self, layout: Layout) -> EngineResult<()> {
        let array_type = self.schema.array_type();
        let allowed = match (array_type, self.query_type) {
            (ArrayType::Dense, _) => matches!(
                layout,
                Layout::RowMajor | Layout::ColMajor | Layout::GlobalOrder
            ),
            (ArrayType::Sparse, QueryType::Write) => {
                matches!(layout, Layout::GlobalOrder | Layout::Unordered)
            }
            (ArrayType::Sparse, QueryType::Read) => layout != Layout::Hilbert,
        };
        if !allowed {
            return Err(EngineError::UnsupportedLayout {
                layout: layout.as_str(),
                context: format!("{array_type} {} queries", self.query_type).to_lowercase(),
            });
        }
        self.layout = layout;
        Ok(())
    }

    fn require_unsubmitted(&self, what: &str) -> EngineResult<()> {
        if self.status != QueryStatus::Uninitialized {
            return Err(EngineError::invalid_operation(format!(
                "{what} must be set before the first submission"
            )));
        }
        Ok(())
    }

    /// Replaces the query's configuration. The query's own subarray takes
    /// it too.
    pub fn set_config(&mut self, config: EngineConfig) -> EngineResult<()> {
        self.require_unsubmitted("query config")?;
        self.subarray.set_config(config.clone());
        self.config = config;
        Ok(())
    }

    /// Returns the query's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Filters read results with `condition`.
    pub fn set_condition(&mut self, condition: &QueryCondition) -> EngineResult<()> {
        if self.query_type != QueryType::Read {
            return Err(EngineError::invalid_operation(
                "query conditions apply to reads only",
            ));
        }
        self.require_unsubmitted("query condition")?;
        let compiled = condition.compile(&self.schema)?;
        self.condition = Some((condition.clone(), compiled));
        Ok(())
    }

    /// Returns the condition filtering read results, if any.
    pub fn condition(&self) -> Option<&QueryCondition> {
        self.condition.as_ref().map(|(c, _)| c)
    }

    /// Returns the number of fragments this query has committed.
    pub fn fragment_num(&self) -> usize {
        self.written.len()
    }

    /// Returns the committed fragment at `index`.
    pub fn fragment(&self, index: usize) -> EngineResult<&Arc<Fragment>> {
        self.written
            .get(index)
            .ok_or(EngineError::IndexOutOfBounds {
                what: "fragment",
                index: index as u64,
                count: self.written.len() as u64,
            })
    }

    /// Returns the URI of the array the query runs against.
    pub fn array_uri(&self) -> &str {
        self.stored.uri()
    }

    /// Replaces the query's subarray with a copy of `subarray`.
    pub fn set_subarray(&mut self, subarray: &Subarray) -> EngineResult<()> {
        if **subarray.schema() != *self.schema {
            return Err(EngineError::invalid_argument(
                "subarray belongs to a different array",
            ));
        }
        if self.schema.array_type() == ArrayType::Sparse && self.query_type == QueryType::Write {
            return Err(EngineError::invalid_operation(
                "sparse writes do not take a subarray",
            ));
        }
        self.subarray = subarray.clone();
        Ok(())
    }

    /// Returns the query's subarray.
    pub fn subarray(&self) -> &Subarray {
        &self.subarray
    }

    /// Resolves `name` and returns the buffers it needs.
    pub fn field_shape(&self, name: &str) -> EngineResult<FieldShape> {
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        Ok(FieldShape {
            datatype: field.datatype(),
            var: field.is_var(),
            nullable: field.nullable(),
        })
    }

    fn begin(&mut self, expected: QueryType) -> EngineResult<u64> {
        if self.query_type != expected {
            return Err(EngineError::invalid_operation(format!(
                "query type is {}, not {expected}",
                self.query_type
            )));
        }
        if self.finalized {
            return Err(EngineError::invalid_operation("query is already finalized"));
        }
        self.status = QueryStatus::InProgress;
        Ok(self.cancel.epoch())
    }

    fn fail(&mut self, error: EngineError) -> EngineError {
        self.status = QueryStatus::Failed;
        self.reason = StatusReason::None;
        self.cursor = None;
        stats::global().record_error();
        tracing::debug!(%error, "query submission failed");
        error
    }

    // === Writes ===

    /// Submits a write.
    pub fn submit_write(&mut self, inputs: &HashMap<String, FieldInput<'_>>) -> EngineResult<()> {
        let epoch = self.begin(QueryType::Write)?;
        match self.write_cells(inputs, epoch) {
            Ok(()) => {
                self.status = QueryStatus::Completed;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn write_cells(
        &mut self,
        inputs: &HashMap<String, FieldInput<'_>>,
        epoch: u64,
    ) -> EngineResult<()> {
        let schema = Arc::clone(&self.schema);
        let domain = schema.domain()?;
        let dense = schema.array_type() == ArrayType::Dense;

        let mut count: Option<usize> = None;
        let mut attr_slots = vec![None; schema.attributes().len()];
        let mut dim_slots = vec![None; domain.ndim()];
        let mut label_slots = vec![None; schema.dimension_labels().len()];
        let mut coords_slot = None;
        for (name, input) in inputs {
            let field = schema
                .field(name)
                .ok_or_else(|| EngineError::field_not_found(name))?;
            let n = input_cell_count(name, &field, input)?;
            match count {
                Some(c) if c != n => {
                    return Err(EngineError::buffer(
                        name,
                        format!("holds {n} cells while other buffers hold {c}"),
                    ))
                }
                _ => count = Some(n),
            }
            match field {
                Field::Attribute(i, _) => attr_slots[i] = Some(*input),
                Field::Dimension(i, _) => dim_slots[i] = Some(*input),
                Field::Label(l, _) => label_slots[l] = Some(*input),
                Field::Coords(..) => coords_slot = Some(*input),
            }
        }
        let count = count.ok_or_else(|| EngineError::invalid_operation("no buffers set"))?;

        let attr_inputs = schema
            .attributes()
            .iter()
            .zip(attr_slots)
            .map(|(a, slot)| {
                slot.ok_or_else(|| EngineError::buffer(a.name(), "buffer required for writes"))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let has_dim_buffers = dim_slots.iter().any(Option::is_some);
        let dense_grid = if dense {
            if has_dim_buffers || coords_slot.is_some() {
                return Err(EngineError::invalid_operation(
                    "dense writes take no coordinate buffers",
                ));
            }
            Some(self.dense_write_grid()?)
        } else {
            if has_dim_buffers && coords_slot.is_some() {
                return Err(EngineError::invalid_operation(
                    "set either dimension buffers or zipped coordinates, not both",
                ));
            }
            None
        };
        let dim_inputs = if dense || coords_slot.is_some() {
            Vec::new()
        } else {
            domain
                .dimensions()
                .iter()
                .zip(dim_slots)
                .map(|(d, slot)| {
                    slot.ok_or_else(|| {
                        EngineError::buffer(d.name(), "coordinates required for sparse writes")
                    })
                })
                .collect::<EngineResult<Vec<_>>>()?
        };

        let first_position = match (&dense_grid, self.layout) {
            (Some(grid), Layout::GlobalOrder) => {
                let start = self.global.dense_written;
                if start + count as u128 > grid.total {
                    return Err(EngineError::invalid_operation(format!(
                        "global-order write exceeds the subarray's {} cells",
                        grid.total
                    )));
                }
                start
            }
            (Some(grid), _) if count as u128 != grid.total => {
                return Err(EngineError::invalid_operation(format!(
                    "dense write holds {count} cells but the subarray has {}",
                    grid.total
                )));
            }
            _ => 0,
        };

        let dims = domain.dimensions();
        let col_major = schema.cell_order() == Layout::ColMajor;
        let mut cells = Vec::with_capacity(count);
        for i in 0..count {
            if i as u128 % CANCEL_CHECK_INTERVAL == 0 && self.cancel.epoch() != epoch {
                return Err(EngineError::Cancelled);
            }
            let coords: Vec<Vec<u8>> = match (&dense_grid, coords_slot) {
                (Some(grid), _) => grid
                    .coords_at(first_position + i as u128)
                    .into_iter()
                    .zip(dims)
                    .map(|(v, d)| Scalar::from_i128(d.datatype(), v).encode(d.datatype()))
                    .collect(),
                (None, Some(zipped)) => {
                    let width = dims[0].datatype().size() as usize;
                    let cell = &zipped.data[i * width * dims.len()..(i + 1) * width * dims.len()];
                    cell.chunks(width).map(<[u8]>::to_vec).collect()
                }
                (None, None) => dims
                    .iter()
                    .enumerate()
                    .map(|(d, dim)| {
                        cell_slice(&Field::Dimension(d, dim), &dim_inputs[d], i).to_vec()
                    })
                    .collect(),
            };
            let mut key = Vec::with_capacity(dims.len());
            for (dim, raw) in dims.iter().zip(&coords) {
                let value = Scalar::decode(dim.datatype(), raw)?;
                if let Some((lo, hi)) = dim.bounds() {
                    if value < lo || value > hi {
                        return Err(EngineError::out_of_bounds(format!(
                            "coordinate of cell {i} lies outside dimension '{}'",
                            dim.name()
                        )));
                    }
                }
                key.push(value);
            }
            if dense_grid.is_none() && self.layout == Layout::GlobalOrder {
                if let Some(last) = &self.global.last_key {
                    if cmp_keys(last, &key, col_major).is_gt() {
                        return Err(EngineError::invalid_operation(format!(
                            "cell {i} breaks global order"
                        )));
                    }
                }
                self.global.last_key = Some(key.clone());
            }
            let values = schema
                .attributes()
                .iter()
                .enumerate()
                .map(|(j, attr)| {
                    let input = &attr_inputs[j];
                    let mut bytes = cell_slice(&Field::Attribute(j, attr), input, i).to_vec();
                    if attr.datatype() == Datatype::Bool {
                        bytes.iter_mut().for_each(|b| *b = u8::from(*b != 0));
                    }
                    CellValue {
                        bytes,
                        valid: input.validity.map_or(true, |v| v[i] != 0),
                    }
                })
                .collect();
            cells.push(Cell {
                key,
                coords,
                values,
            });
        }

        let mut labels = Vec::new();
        for (l, (label, slot)) in schema.dimension_labels().iter().zip(label_slots).enumerate() {
            if let Some(input) = slot {
                labels.extend(label_values(l, label, &input, &cells)?);
            }
        }

        let bytes = inputs.values().map(|i| i.data.len() as u64).sum();
        stats::global().record_write(count as u64, bytes);
        if self.layout == Layout::GlobalOrder {
            self.global.dense_written += count as u128;
            self.global.pending.cells.extend(cells);
            self.global.pending.labels.extend(labels);
        } else if !cells.is_empty() || !labels.is_empty() {
            let fragment = self
                .stored
                .commit(FragmentData { cells, labels }, self.timestamp);
            self.written.push(fragment);
        }
        Ok(())
    }

    fn dense_write_grid(&self) -> EngineResult<DenseGrid> {
        let ndim = self.schema.domain()?.ndim();
        let mut ranges = Vec::with_capacity(ndim);
        for dim in 0..ndim {
            if self.subarray.range_num(dim)? != 1 {
                return Err(EngineError::invalid_operation(
                    "dense writes need exactly one range per dimension",
                ));
            }
            ranges.push(self.subarray.integer_ranges(dim)?);
        }
        let col_major = match self.layout {
            Layout::ColMajor => true,
            Layout::GlobalOrder => self.schema.cell_order() == Layout::ColMajor,
            _ => false,
        };
        Ok(DenseGrid::new(ranges, col_major))
    }

    /// Commits pending global-order cells. Reads and other writes have
    /// nothing to finalize.
    pub fn finalize(&mut self) -> EngineResult<()> {
        if self.finalized {
            return Ok(());
        }
        if self.query_type == QueryType::Write && self.layout == Layout::GlobalOrder {
            if self.schema.array_type() == ArrayType::Dense && self.global.dense_written > 0 {
                let total = self.dense_write_grid()?.total;
                if self.global.dense_written != total {
                    return Err(EngineError::invalid_operation(format!(
                        "global-order write covered {} of {total} cells",
                        self.global.dense_written
                    )));
                }
            }
            let pending = std::mem::take(&mut self.global.pending);
            if !pending.cells.is_empty() || !pending.labels.is_empty() {
                let fragment = self.stored.commit(pending, self.timestamp);
                self.written.push(fragment);
            }
        }
        self.finalized = true;
        stats::global().record_finalize();
        tracing::debug!(uri = %self.stored.uri(), "finalized query");
        Ok(())
    }

    // === Reads ===

    /// Submits a read, resuming after the last delivered cell if the
    /// previous submission was incomplete. Returns the bytes written into
    /// each field's buffers.
    pub fn submit_read(
        &mut self,
        outputs: &mut HashMap<String, FieldOutput<'_>>,
    ) -> EngineResult<HashMap<String, FieldSizes>> {
        let epoch = self.begin(QueryType::Read)?;
        match self.read_cells(outputs, epoch) {
            Ok(sizes) => Ok(sizes),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn read_cells(
        &mut self,
        outputs: &mut HashMap<String, FieldOutput<'_>>,
        epoch: u64,
    ) -> EngineResult<HashMap<String, FieldSizes>> {
        if outputs.is_empty() {
            return Err(EngineError::invalid_operation("no buffers set"));
        }
        let schema = Arc::clone(&self.schema);
        let mut targets = Vec::with_capacity(outputs.len());
        for (name, out) in outputs.iter_mut() {
            let field = schema
                .field(name)
                .ok_or_else(|| EngineError::field_not_found(name))?;
            check_output_shape(name, &field, out)?;
            targets.push(Target {
                name,
                field,
                out,
                sizes: FieldSizes::default(),
            });
        }

        let mut cursor = match self.cursor.take() {
            Some(cursor) if self.reason != StatusReason::None => cursor,
            _ => ReadCursor {
                results: self.build_results()?,
                position: 0,
            },
        };

        let merged = self.snapshot.merged();
        let fragments = self.snapshot.fragments();
        let labels = self.label_maps(&targets);
        let condition = self.condition.as_ref().map(|(_, c)| c);
        let dtypes: Vec<Datatype> = schema
            .domain()?
            .dimensions()
            .iter()
            .map(|d| d.datatype())
            .collect();
        let total = cursor.results.len();
        let mut delivered: u64 = 0;
        let mut used: u64 = 0;
        let mut reason = StatusReason::None;

        while cursor.position < total {
            if u128::from(delivered) % CANCEL_CHECK_INTERVAL == 0
                && delivered > 0
                && self.cancel.epoch() != epoch
            {
                return Err(EngineError::Cancelled);
            }
            let view = cell_view(
                &cursor.results,
                cursor.position,
                fragments,
                &merged,
                &dtypes,
                condition,
            );
            let mut pieces = Vec::with_capacity(targets.len());
            let mut cell_bytes = 0;
            let mut fits = true;
            for target in &targets {
                let (bytes, valid) = field_bytes(&target.field, &view, &labels);
                cell_bytes += bytes.len() as u64
                    + if target.field.is_var() { 8 } else { 0 }
                    + u64::from(target.field.nullable());
                fits &= target.fits(bytes.len());
                pieces.push((bytes, valid));
            }
            if !fits {
                reason = StatusReason::UserBufferSize;
                break;
            }
            if delivered > 0 && used + cell_bytes > self.config.memory_budget {
                reason = StatusReason::MemoryBudget;
                break;
            }
            for (target, (bytes, valid)) in targets.iter_mut().zip(&pieces) {
                target.write(bytes, *valid);
            }
            used += cell_bytes;
            delivered += 1;
            cursor.position += 1;
        }

        let sizes: HashMap<String, FieldSizes> = targets
            .iter()
            .map(|t| (t.name.clone(), t.sizes))
            .collect();
        let incomplete = reason != StatusReason::None;
        stats::global().record_read(delivered, used, incomplete);
        if incomplete {
            tracing::debug!(
                uri = %self.stored.uri(),
                delivered,
                remaining = %(total - cursor.position),
                reason = %reason,
                "read incomplete"
            );
            self.status = QueryStatus::Incomplete;
            self.cursor = Some(cursor);
        } else {
            self.status = QueryStatus::Completed;
            self.cursor = None;
        }
        self.reason = reason;
        self.last_sizes = sizes.clone();
        Ok(sizes)
    }

    fn build_results(&self) -> EngineResult<ResultSet> {
        let ndim = self.schema.domain()?.ndim();
        let col_major = match self.layout {
            Layout::ColMajor => true,
            Layout::GlobalOrder => self.schema.cell_order() == Layout::ColMajor,
            _ => false,
        };
        if self.schema.array_type() == ArrayType::Dense {
            let ranges = (0..ndim)
                .map(|d| self.subarray.integer_ranges(d))
                .collect::<EngineResult<Vec<_>>>()?;
            return Ok(ResultSet::Dense(DenseGrid::new(ranges, col_major)));
        }

        let mut merged: BTreeMap<&[Scalar], (usize, usize)> = BTreeMap::new();
        for (f, fragment) in self.snapshot.fragments().iter().enumerate() {
            for (c, cell) in fragment.cells().iter().enumerate() {
                merged.insert(cell.key.as_slice(), (f, c));
            }
        }
        let fragments = self.snapshot.fragments();
        let condition = self.condition.as_ref().map(|(_, c)| c);
        let mut refs: Vec<(&[Scalar], (usize, usize))> = merged
            .into_iter()
            .filter(|(key, _)| self.subarray.matches(key))
            .filter(|(_, (f, c))| {
                let cell = &fragments[*f].cells()[*c];
                condition.map_or(true, |cond| cond.matches(&cell.coords, &cell.values))
            })
            .collect();
        if col_major {
            refs.sort_by(|a, b| cmp_keys(a.0, b.0, true));
        }
        Ok(ResultSet::Sparse(refs.into_iter().map(|(_, r)| r).collect()))
    }

    /// Estimates the bytes a complete read of `name` would produce.
    pub fn est_result_size(&self, name: &str) -> EngineResult<FieldSizes> {
        if self.query_type != QueryType::Read {
            return Err(EngineError::invalid_operation(
                "result sizes can only be estimated for reads",
            ));
        }
        let field = self
            .schema
            .field(name)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        let results = self.build_results()?;
        let merged = self.snapshot.merged();
        let labels: Vec<LabelMap<'_>> = match field {
            Field::Label(..) => (0..self.schema.dimension_labels().len())
                .map(|l| self.snapshot.label_values(l))
                .collect(),
            _ => Vec::new(),
        };
        let condition = self.condition.as_ref().map(|(_, c)| c);
        let dtypes: Vec<Datatype> = self
            .schema
            .domain()?
            .dimensions()
            .iter()
            .map(|d| d.datatype())
            .collect();
        let mut sizes = FieldSizes::default();
        let mut position = 0;
        while position < results.len() {
            let view = cell_view(
                &results,
                position,
                self.snapshot.fragments(),
                &merged,
                &dtypes,
                condition,
            );
            sizes.data += field_bytes(&field, &view, &labels).0.len() as u64;
            if field.is_var() {
                sizes.offsets += 8;
            }
            if field.nullable() {
                sizes.validity += 1;
            }
            position += 1;
        }
        Ok(sizes)
    }
}

impl Query {
    /// Latest label values for every label, when any target reads one.
    fn label_maps(&self, targets: &[Target<'_, '_, '_, '_>]) -> Vec<LabelMap<'_>> {
        if !targets.iter().any(|t| matches!(t.field, Field::Label(..))) {
            return Vec::new();
        }
        (0..self.schema.dimension_labels().len())
            .map(|l| self.snapshot.label_values(l))
            .collect()
    }
}

/// Collects the values one write sets for dimension label `index`, one per
/// distinct coordinate, and checks they follow the label's order.
fn label_values(
    index: usize,
    label: &DimensionLabel,
    input: &FieldInput<'_>,
    cells: &[Cell],
) -> EngineResult<Vec<LabelValue>> {
    let field = Field::Label(index, label);
    let dim = label.dimension();
    let mut by_coord: BTreeMap<&Scalar, (&[u8], &[u8])> = BTreeMap::new();
    for (i, cell) in cells.iter().enumerate() {
        let value = cell_slice(&field, input, i);
        let coord = cell.coords[dim].as_slice();
        match by_coord.get(&cell.key[dim]) {
            Some((_, seen)) if *seen != value => {
                return Err(EngineError::buffer(
                    label.name(),
                    format!("cell {i} gives its coordinate a second, different label value"),
                ))
            }
            Some(_) => {}
            None => {
                by_coord.insert(&cell.key[dim], (coord, value));
            }
        }
    }

    let mut previous: Option<Scalar> = None;
    for (_, value) in by_coord.values() {
        let current = Scalar::decode(label.datatype(), value)
            .map_err(|e| EngineError::buffer(label.name(), e.to_string()))?;
        if let Some(prev) = &previous {
            let ordered = match label.order() {
                DataOrder::Increasing => prev < &current,
                DataOrder::Decreasing => prev > &current,
            };
            if !ordered {
                return Err(EngineError::buffer(
                    label.name(),
                    format!("label values break {} order", label.order()),
                ));
            }
        }
        previous = Some(current);
    }

    Ok(by_coord
        .into_values()
        .map(|(coord, bytes)| LabelValue {
            label: index,
            coord: coord.to_vec(),
            bytes: bytes.to_vec(),
        })
        .collect())
}

struct Target<'n, 's, 'o, 'b> {
    name: &'n String,
    field: Field<'s>,
    out: &'o mut FieldOutput<'b>,
    sizes: FieldSizes,
}

impl Target<'_, '_, '_, '_> {
    fn fits(&self, len: usize) -> bool {
        let data = self.sizes.data as usize + len <= self.out.data.len();
        let offsets = self
            .out
            .offsets
            .as_ref()
            .map_or(true, |o| ((self.sizes.offsets / 8) as usize) < o.len());
        let validity = self
            .out
            .validity
            .as_ref()
            .map_or(true, |v| (self.sizes.validity as usize) < v.len());
        data && offsets && validity
    }

    fn write(&mut self, bytes: &[u8], valid: bool) {
        if let Some(offsets) = self.out.offsets.as_deref_mut() {
            offsets[(self.sizes.offsets / 8) as usize] = self.sizes.data;
            self.sizes.offsets += 8;
        }
        let start = self.sizes.data as usize;
        self.out.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.sizes.data += bytes.len() as u64;
        if let Some(validity) = self.out.validity.as_deref_mut() {
            validity[self.sizes.validity as usize] = u8::from(valid);
            self.sizes.validity += 1;
        }
    }
}

/// Builds the view of one result. Dense cells that fail `condition` read
/// as unwritten; sparse results were filtered when the result set was
/// built.
fn cell_view<'a>(
    results: &ResultSet,
    position: u128,
    fragments: &'a [Arc<Fragment>],
    merged: &BTreeMap<&'a [Scalar], &'a Cell>,
    dtypes: &[Datatype],
    condition: Option<&CompiledCondition>,
) -> CellView<'a> {
    match results {
        ResultSet::Dense(grid) => {
            let key: Vec<Scalar> = grid
                .coords_at(position)
                .into_iter()
                .zip(dtypes)
                .map(|(v, dt)| Scalar::from_i128(*dt, v))
                .collect();
            let coords: Vec<Vec<u8>> =
                key.iter().zip(dtypes).map(|(k, dt)| k.encode(*dt)).collect();
            let values = merged
                .get(key.as_slice())
                .map(|&c| c.values.as_slice())
                .filter(|values| condition.map_or(true, |c| c.matches(&coords, values)));
            CellView {
                coords: Cow::Owned(coords),
                values,
            }
        }
        ResultSet::Sparse(refs) => {
            let (f, c) = refs[position as usize];
            let cell = &fragments[f].cells()[c];
            CellView {
                coords: Cow::Borrowed(&cell.coords),
                values: Some(&cell.values),
            }
        }
    }
}

fn field_bytes<'a>(
    field: &Field<'a>,
    view: &'a CellView<'a>,
    labels: &[LabelMap<'a>],
) -> (Cow<'a, [u8]>, bool) {
    match field {
        Field::Dimension(i, _) => (Cow::Borrowed(view.coords[*i].as_slice()), true),
        Field::Label(l, label) => {
            let coord = view.coords[label.dimension()].as_slice();
            let value = labels
                .get(*l)
                .and_then(|values| values.get(coord).copied())
                .unwrap_or_else(|| label.fill_value());
            (Cow::Borrowed(value), true)
        }
        Field::Coords(..) => (Cow::Owned(view.coords.concat()), true),
        Field::Attribute(j, attr) => match view.values {
            Some(values) => (Cow::Borrowed(values[*j].bytes.as_slice()), values[*j].valid),
            None => (Cow::Borrowed(attr.fill_value()), attr.fill_valid()),
        },
    }
}

fn check_output_shape(name: &str, field: &Field<'_>, out: &FieldOutput<'_>) -> EngineResult<()> {
    if field.is_var() != out.offsets.is_some() {
        return Err(EngineError::buffer(
            name,
            if field.is_var() {
                "offsets buffer required for var-sized field"
            } else {
                "offsets buffer set on fixed-sized field"
            },
        ));
    }
    if field.nullable() != out.validity.is_some() {
        return Err(EngineError::buffer(
            name,
            if field.nullable() {
                "validity buffer required for nullable field"
            } else {
                "validity buffer set on non-nullable field"
            },
        ));
    }
    Ok(())
}

fn input_cell_count(name: &str, field: &Field<'_>, input: &FieldInput<'_>) -> EngineResult<usize> {
    let count = if field.is_var() {
        let offsets = input.offsets.ok_or_else(|| {
            EngineError::buffer(name, "offsets buffer required for var-sized field")
        })?;
        let ascending = offsets.windows(2).all(|w| w[0] <= w[1]);
        let in_range = offsets.last().map_or(true, |&o| o <= input.data.len() as u64);
        if !ascending || !in_range {
            return Err(EngineError::buffer(
                name,
                "offsets must ascend and stay within the data buffer",
            ));
        }
        offsets.len()
    } else {
        if input.offsets.is_some() {
            return Err(EngineError::buffer(name, "offsets buffer set on fixed-sized field"));
        }
        let size = field.cell_size().unwrap_or(1) as usize;
        if input.data.len() % size != 0 {
            return Err(EngineError::buffer(
                name,
                format!(
                    "data holds {} bytes, not a multiple of the {size}-byte cell",
                    input.data.len()
                ),
            ));
        }
        input.data.len() / size
    };
    match (field.nullable(), input.validity) {
        (true, Some(v)) if v.len() != count => Err(EngineError::buffer(
            name,
            format!("validity holds {} values, expected {count}", v.len()),
        )),
        (true, None) => Err(EngineError::buffer(
            name,
            "validity buffer required for nullable field",
        )),
        (false, Some(_)) => Err(EngineError::buffer(
            name,
            "validity buffer set on non-nullable field",
        )),
        _ => Ok(count),
    }
}

fn cell_slice<'a>(field: &Field<'_>, input: &FieldInput<'a>, i: usize) -> &'a [u8] {
    match input.offsets {
        Some(offsets) if field.is_var() => {
            let start = offsets[i] as usize;
            let end = offsets.get(i + 1).map_or(input.data.len(), |&o| o as usize);
            &input.data[start..end]
        }
        _ => {
            let size = field.cell_size().unwrap_or(1) as usize;
            &input.data[i * size..(i + 1) * size]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::create_array;
    use crate::schema::{Attribute, Dimension, Domain};
    use crate::types::{ConditionOp, VAR_NUM};

    fn uri() -> String {
        format!("mem://query-test/{}", uuid::Uuid::new_v4())
    }

    fn pair<T: Copy>(lo: T, hi: T, enc: fn(T) -> Vec<u8>) -> Vec<u8> {
        let mut v = enc(lo);
        v.extend(enc(hi));
        v
    }

    fn i32b(v: i32) -> Vec<u8> {
        v.to_ne_bytes().to_vec()
    }

    fn i32s(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn read_i32s(bytes: &[u8]) -> Vec<i32> {
        bytes
            .chunks(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// 4x4 dense array of int32 `a` over rows/cols in [1, 4].
    fn dense_array() -> String {
        let uri = uri();
        let mut domain = Domain::new();
        for name in ["rows", "cols"] {
            domain
                .add_dimension(
                    Dimension::new(name, Datatype::Int32, Some(&pair(1, 4, i32b)), None).unwrap(),
                )
                .unwrap();
        }
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema.set_domain(domain);
        schema
            .add_attribute(Attribute::new("a", Datatype::Int32).unwrap())
            .unwrap();
        create_array(&uri, schema).unwrap();
        uri
    }

    /// Sparse array with a string dimension and a nullable var attribute.
    fn sparse_array() -> String {
        let uri = uri();
        let mut domain = Domain::new();
        domain
            .add_dimension(Dimension::new("key", Datatype::StringAscii, None, None).unwrap())
            .unwrap();
        let mut attr = Attribute::new("label", Datatype::StringUtf8).unwrap();
        attr.set_cell_val_num(VAR_NUM).unwrap();
        attr.set_nullable(true);
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema.set_domain(domain);
        schema.add_attribute(attr).unwrap();
        create_array(&uri, schema).unwrap();
        uri
    }

    fn open(uri: &str, mode: QueryType) -> Array {
        let mut array = Array::new(uri);
        array.open(mode).unwrap();
        array
    }

    fn query(array: &Array, config: EngineConfig) -> Query {
        Query::new(array, config, Arc::new(CancelToken::new())).unwrap()
    }

    fn write_dense(uri: &str, values: &[i32]) {
        let array = open(uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let data = i32s(values);
        let inputs = HashMap::from([(
            "a".to_string(),
            FieldInput {
                data: &data,
                offsets: None,
                validity: None,
            },
        )]);
        q.submit_write(&inputs).unwrap();
        assert_eq!(q.status(), QueryStatus::Completed);
    }

    fn read_a(q: &mut Query, capacity: usize) -> (Vec<i32>, QueryStatus) {
        let mut data = vec![0u8; capacity * 4];
        let mut outputs = HashMap::from([(
            "a".to_string(),
            FieldOutput {
                data: &mut data,
                offsets: None,
                validity: None,
            },
        )]);
        let sizes = q.submit_read(&mut outputs).unwrap();
        let used = sizes["a"].data as usize;
        drop(outputs);
        (read_i32s(&data[..used]), q.status())
    }

    #[test]
    fn dense_write_then_read() {
        let uri = dense_array();
        write_dense(&uri, &(1..=16).collect::<Vec<_>>());

        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let mut sub = Subarray::new(Arc::clone(q.schema()), EngineConfig::default()).unwrap();
        sub.add_range(0, &i32b(1), &i32b(2)).unwrap();
        sub.add_range(1, &i32b(2), &i32b(4)).unwrap();
        q.set_subarray(&sub).unwrap();

        let (values, status) = read_a(&mut q, 16);
        assert_eq!(values, vec![2, 3, 4, 6, 7, 8]);
        assert_eq!(status, QueryStatus::Completed);
        assert!(q.has_results());
    }

    #[test]
    fn dense_col_major_and_fill() {
        let uri = dense_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let mut sub = Subarray::new(Arc::clone(q.schema()), EngineConfig::default()).unwrap();
        sub.add_range(0, &i32b(1), &i32b(2)).unwrap();
        sub.add_range(1, &i32b(1), &i32b(2)).unwrap();
        q.set_subarray(&sub).unwrap();
        q.set_layout(Layout::ColMajor).unwrap();
        let data = i32s(&[1, 2, 3, 4]);
        let inputs = HashMap::from([(
            "a".to_string(),
            FieldInput {
                data: &data,
                offsets: None,
                validity: None,
            },
        )]);
        q.submit_write(&inputs).unwrap();
        drop(array);

        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let mut sub = Subarray::new(Arc::clone(q.schema()), EngineConfig::default()).unwrap();
        sub.add_range(0, &i32b(1), &i32b(3)).unwrap();
        sub.add_range(1, &i32b(1), &i32b(1)).unwrap();
        q.set_subarray(&sub).unwrap();
        let (values, _) = read_a(&mut q, 8);
        assert_eq!(values, vec![1, 2, i32::MIN]);
    }

    #[test]
    fn dense_write_size_mismatch_fails() {
        let uri = dense_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let data = i32s(&[1, 2, 3]);
        let inputs = HashMap::from([(
            "a".to_string(),
            FieldInput {
                data: &data,
                offsets: None,
                validity: None,
            },
        )]);
        assert!(q.submit_write(&inputs).is_err());
        assert_eq!(q.status(), QueryStatus::Failed);
    }

    #[test]
    fn incomplete_reads_resume() {
        let uri = dense_array();
        write_dense(&uri, &(1..=16).collect::<Vec<_>>());
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());

        let mut all = Vec::new();
        let mut rounds = 0;
        loop {
            let (values, status) = read_a(&mut q, 5);
            all.extend(values);
            rounds += 1;
            if status == QueryStatus::Completed {
                break;
            }
            assert_eq!(status, QueryStatus::Incomplete);
            assert_eq!(q.status_reason(), StatusReason::UserBufferSize);
        }
        assert_eq!(rounds, 4);
        assert_eq!(all, (1..=16).collect::<Vec<_>>());
    }

    #[test]
    fn zero_capacity_is_incomplete_with_nothing() {
        let uri = dense_array();
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let (values, status) = read_a(&mut q, 0);
        assert!(values.is_empty());
        assert_eq!(status, QueryStatus::Incomplete);
        assert!(!q.has_results());
    }

    #[test]
    fn memory_budget_limits_submission() {
        let uri = dense_array();
        write_dense(&uri, &(1..=16).collect::<Vec<_>>());
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::new().memory_budget(16));
        let (values, status) = read_a(&mut q, 16);
        assert_eq!(values, vec![1, 2, 3, 4]);
        assert_eq!(status, QueryStatus::Incomplete);
        assert_eq!(q.status_reason(), StatusReason::MemoryBudget);
    }

    #[test]
    fn sparse_var_nullable_round_trip() {
        let uri = sparse_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let keys = b"bbaccc".to_vec();
        let key_offsets = [0u64, 2, 3];
        let labels = b"twoonethree".to_vec();
        let label_offsets = [0u64, 3, 6];
        let validity = [1u8, 0, 1];
        let inputs = HashMap::from([
            (
                "key".to_string(),
                FieldInput {
                    data: &keys,
                    offsets: Some(&key_offsets),
                    validity: None,
                },
            ),
            (
                "label".to_string(),
                FieldInput {
                    data: &labels,
                    offsets: Some(&label_offsets),
                    validity: Some(&validity),
                },
            ),
        ]);
        q.submit_write(&inputs).unwrap();
        drop(array);

        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        assert_eq!(
            q.est_result_size("key").unwrap(),
            FieldSizes {
                data: 6,
                offsets: 24,
                validity: 0
            }
        );
        let mut key_data = vec![0u8; 16];
        let mut key_offs = vec![0u64; 4];
        let mut label_data = vec![0u8; 16];
        let mut label_offs = vec![0u64; 4];
        let mut label_valid = vec![0u8; 4];
        let mut outputs = HashMap::from([
            (
                "key".to_string(),
                FieldOutput {
                    data: &mut key_data,
                    offsets: Some(&mut key_offs),
                    validity: None,
                },
            ),
            (
                "label".to_string(),
                FieldOutput {
                    data: &mut label_data,
                    offsets: Some(&mut label_offs),
                    validity: Some(&mut label_valid),
                },
            ),
        ]);
        let sizes = q.submit_read(&mut outputs).unwrap();
        drop(outputs);
        assert_eq!(sizes["key"].data, 6);
        assert_eq!(&key_data[..6], b"abbccc");
        assert_eq!(&key_offs[..3], &[0, 1, 3]);
        assert_eq!(&label_data[..11], b"onetwothree");
        assert_eq!(&label_valid[..3], &[0, 1, 1]);
    }

    #[test]
    fn sparse_write_requires_coordinates() {
        let uri = sparse_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let labels = b"x".to_vec();
        let offsets = [0u64];
        let validity = [1u8];
        let inputs = HashMap::from([(
            "label".to_string(),
            FieldInput {
                data: &labels,
                offsets: Some(&offsets),
                validity: Some(&validity),
            },
        )]);
        let err = q.submit_write(&inputs).unwrap_err();
        assert!(matches!(err, EngineError::Buffer { ref name, .. } if name == "key"));
        assert!(q.set_layout(Layout::RowMajor).is_err());
    }

    #[test]
    fn global_order_dense_write_commits_on_finalize() {
        let uri = dense_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        q.set_layout(Layout::GlobalOrder).unwrap();
        for chunk in (1..=16).collect::<Vec<i32>>().chunks(8) {
            let data = i32s(chunk);
            let inputs = HashMap::from([(
                "a".to_string(),
                FieldInput {
                    data: &data,
                    offsets: None,
                    validity: None,
                },
            )]);
            q.submit_write(&inputs).unwrap();
        }
        assert!(array.stored().unwrap().snapshot().is_empty());
        q.finalize().unwrap();
        assert!(!array.stored().unwrap().snapshot().is_empty());
        assert!(q.submit_write(&HashMap::new()).is_err());
    }

    #[test]
    fn read_validates_buffer_shapes() {
        let uri = sparse_array();
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let mut data = vec![0u8; 8];
        let mut outputs = HashMap::from([(
            "label".to_string(),
            FieldOutput {
                data: &mut data,
                offsets: None,
                validity: None,
            },
        )]);
        assert!(q.submit_read(&mut outputs).is_err());
        assert_eq!(q.status(), QueryStatus::Failed);
        assert!(q.field_shape("missing").unwrap_err().is_not_found());
        let shape = q.field_shape("label").unwrap();
        assert!(shape.var && shape.nullable);
    }

    /// Dense 1-D array over x in [1, 4] with int32 `a`, a string label and
    /// a decreasing float label on x.
    fn labelled_array() -> String {
        let uri = uri();
        let mut domain = Domain::new();
        domain
            .add_dimension(
                Dimension::new("x", Datatype::Int32, Some(&pair(1, 4, i32b)), None).unwrap(),
            )
            .unwrap();
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema.set_domain(domain);
        schema
            .add_attribute(Attribute::new("a", Datatype::Int32).unwrap())
            .unwrap();
        schema
            .add_dimension_label(0, "x_name", DataOrder::Increasing, Datatype::StringAscii)
            .unwrap();
        schema
            .add_dimension_label(0, "x_pos", DataOrder::Decreasing, Datatype::Float64)
            .unwrap();
        create_array(&uri, schema).unwrap();
        uri
    }

    fn f64s(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn dimension_labels_are_written_and_read_per_coordinate() {
        let uri = labelled_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let mut sub = Subarray::new(Arc::clone(q.schema()), EngineConfig::default()).unwrap();
        sub.add_range(0, &i32b(1), &i32b(3)).unwrap();
        q.set_subarray(&sub).unwrap();
        let a = i32s(&[10, 20, 30]);
        let names = b"ambercobaltdune".to_vec();
        let name_offsets = [0u64, 5, 11];
        let pos = f64s(&[0.5, 0.25, 0.125]);
        let inputs = HashMap::from([
            (
                "a".to_string(),
                FieldInput {
                    data: &a,
                    offsets: None,
                    validity: None,
                },
            ),
            (
                "x_name".to_string(),
                FieldInput {
                    data: &names,
                    offsets: Some(&name_offsets),
                    validity: None,
                },
            ),
            (
                "x_pos".to_string(),
                FieldInput {
                    data: &pos,
                    offsets: None,
                    validity: None,
                },
            ),
        ]);
        q.submit_write(&inputs).unwrap();
        assert_eq!(q.fragment_num(), 1);
        assert_eq!(q.fragment(0).unwrap().labels().len(), 6);
        drop(array);

        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let mut name_data = vec![0u8; 32];
        let mut name_offs = vec![0u64; 4];
        let mut pos_data = vec![0u8; 32];
        let mut outputs = HashMap::from([
            (
                "x_name".to_string(),
                FieldOutput {
                    data: &mut name_data,
                    offsets: Some(&mut name_offs),
                    validity: None,
                },
            ),
            (
                "x_pos".to_string(),
                FieldOutput {
                    data: &mut pos_data,
                    offsets: None,
                    validity: None,
                },
            ),
        ]);
        let sizes = q.submit_read(&mut outputs).unwrap();
        drop(outputs);
        assert_eq!(&name_data[..sizes["x_name"].data as usize], b"ambercobaltdune");
        assert_eq!(&name_offs[..], &[0, 5, 11, 15]);
        let pos: Vec<f64> = pos_data[..32]
            .chunks(8)
            .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(&pos[..3], &[0.5, 0.25, 0.125]);
        assert!(pos[3].is_nan());
        assert_eq!(q.est_result_size("x_name").unwrap().data, 15);
    }

    #[test]
    fn dimension_labels_must_follow_their_order() {
        let uri = labelled_array();
        let array = open(&uri, QueryType::Write);
        let mut q = query(&array, EngineConfig::default());
        let a = i32s(&[1, 2, 3, 4]);
        let pos = f64s(&[4.0, 3.0, 3.0, 1.0]);
        let inputs = HashMap::from([
            (
                "a".to_string(),
                FieldInput {
                    data: &a,
                    offsets: None,
                    validity: None,
                },
            ),
            (
                "x_pos".to_string(),
                FieldInput {
                    data: &pos,
                    offsets: None,
                    validity: None,
                },
            ),
        ]);
        let err = q.submit_write(&inputs).unwrap_err();
        assert!(matches!(err, EngineError::Buffer { ref name, .. } if name == "x_pos"));
        assert!(array.stored().unwrap().snapshot().is_empty());
    }

    #[test]
    fn conditions_drop_sparse_cells_and_fill_dense_ones() {
        let uri = dense_array();
        write_dense(&uri, &(1..=16).collect::<Vec<_>>());
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        let odd_rows = QueryCondition::compare("a", ConditionOp::Gt, Some(&i32b(12))).unwrap();
        q.set_condition(&odd_rows).unwrap();
        let (values, _) = read_a(&mut q, 16);
        let mut expected = vec![i32::MIN; 12];
        expected.extend(13..=16);
        assert_eq!(values, expected);
        assert!(q.set_condition(&odd_rows).is_err());

        let uri = sparse_array();
        let writer = open(&uri, QueryType::Write);
        let mut w = query(&writer, EngineConfig::default());
        let keys = b"abc".to_vec();
        let key_offsets = [0u64, 1, 2];
        let labels = b"xyz".to_vec();
        let label_offsets = [0u64, 1, 2];
        let validity = [1u8, 0, 1];
        let inputs = HashMap::from([
            (
                "key".to_string(),
                FieldInput {
                    data: &keys,
                    offsets: Some(&key_offsets),
                    validity: None,
                },
            ),
            (
                "label".to_string(),
                FieldInput {
                    data: &labels,
                    offsets: Some(&label_offsets),
                    validity: Some(&validity),
                },
            ),
        ]);
        assert!(w.set_condition(&odd_rows).is_err());
        w.submit_write(&inputs).unwrap();
        drop(writer);

        let reader = open(&uri, QueryType::Read);
        let mut q = query(&reader, EngineConfig::default());
        let not_null = QueryCondition::compare("label", ConditionOp::Ne, None).unwrap();
        q.set_condition(&not_null).unwrap();
        assert_eq!(q.est_result_size("key").unwrap().data, 2);
        let mut key_data = vec![0u8; 8];
        let mut key_offs = vec![0u64; 4];
        let mut outputs = HashMap::from([(
            "key".to_string(),
            FieldOutput {
                data: &mut key_data,
                offsets: Some(&mut key_offs),
                validity: None,
            },
        )]);
        let sizes = q.submit_read(&mut outputs).unwrap();
        drop(outputs);
        assert_eq!(&key_data[..sizes["key"].data as usize], b"ac");
    }

    #[test]
    fn config_is_fixed_once_submitted() {
        let uri = dense_array();
        write_dense(&uri, &(1..=16).collect::<Vec<_>>());
        let array = open(&uri, QueryType::Read);
        let mut q = query(&array, EngineConfig::default());
        q.set_config(EngineConfig::new().memory_budget(8)).unwrap();
        assert_eq!(q.config().memory_budget, 8);
        let (values, status) = read_a(&mut q, 16);
        assert_eq!(values, vec![1, 2]);
        assert_eq!(status, QueryStatus::Incomplete);
        assert!(q.set_config(EngineConfig::default()).is_err());
    }

    #[test]
    fn writes_stamp_fragments_with_the_open_timestamp() {
        let uri = dense_array();
        let mut array = Array::new(&uri);
        array.open_at(QueryType::Write, 42).unwrap();
        let mut q = query(&array, EngineConfig::default());
        assert!(q.fragment(0).is_err());
        let data = i32s(&(1..=16).collect::<Vec<_>>());
        let inputs = HashMap::from([(
            "a".to_string(),
            FieldInput {
                data: &data,
                offsets: None,
                validity: None,
            },
        )]);
        q.submit_write(&inputs).unwrap();
        let fragment = q.fragment(0).unwrap();
        assert_eq!(fragment.timestamp(), 42);
        assert!(fragment.uri(q.array_uri()).contains("/__fragments/__42_42_"));

        let mut before = Array::new(&uri);
        before.open_at(QueryType::Read, 41).unwrap();
        let mut q = query(&before, EngineConfig::default());
        let (values, _) = read_a(&mut q, 16);
        assert_eq!(values, vec![i32::MIN; 16]);
    }

    #[test]
    fn dense_grid_multi_range_order() {
        let grid = DenseGrid::new(vec![vec![(1, 1), (3, 3)], vec![(5, 6)]], false);
        let cells: Vec<Vec<i128>> = (0..grid.total).map(|p| grid.coords_at(p)).collect();
        assert_eq!(cells, vec![vec![1, 5], vec![1, 6], vec![3, 5], vec![3, 6]]);

        let grid = DenseGrid::new(vec![vec![(1, 2)], vec![(5, 6)]], true);
        assert_eq!(grid.coords_at(1), vec![2, 5]);
    }
}
