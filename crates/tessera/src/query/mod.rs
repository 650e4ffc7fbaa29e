//! Read and write queries.
//!
//! A [`Query`] owns every buffer bound to it. The engine keeps the address
//! of each one from the `set_*_buffer` call until the query is released, so
//! the memory moves into the query's [`QueryBufferSet`] and comes back only
//! through a replacing `set_*_buffer` call or [`Query::into_buffers`].
//!
//! A read that does not fit stops with [`QueryStatus::Incomplete`]. Drain
//! the results, optionally rebind larger buffers, and submit again:
//!
//! ```no_run
//! # use tessera::{Array, Context, Query, QueryStatus, QueryType};
//! # fn main() -> tessera::Result<()> {
//! let ctx = Context::new(None)?;
//! let array = Array::new(&ctx, "mem://readings")?;
//! array.open(QueryType::Read)?;
//! let query = Query::new(&array, QueryType::Read)?;
//! query.set_data_buffer("a", vec![0i32; 64])?;
//! let mut values = Vec::new();
//! loop {
//!     let status = query.submit()?;
//!     values.extend(query.result_data::<i32>("a")?);
//!     if status != QueryStatus::Incomplete {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod buffers;

use std::collections::HashMap;
use std::ffi::c_void;

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tessera_ffi::{
    tessera_query_alloc, tessera_query_finalize, tessera_query_free, tessera_query_get_config,
    tessera_query_get_data_buffer, tessera_query_get_est_result_size,
    tessera_query_get_est_result_size_nullable, tessera_query_get_est_result_size_var,
    tessera_query_get_est_result_size_var_nullable, tessera_query_get_fragment_num,
    tessera_query_get_fragment_timestamp_range, tessera_query_get_fragment_uri,
    tessera_query_get_layout, tessera_query_get_offsets_buffer, tessera_query_get_status,
    tessera_query_get_status_details, tessera_query_get_type, tessera_query_get_validity_buffer,
    tessera_query_has_results, tessera_query_set_condition, tessera_query_set_config,
    tessera_query_set_data_buffer, tessera_query_set_layout, tessera_query_set_offsets_buffer,
    tessera_query_set_subarray, tessera_query_set_validity_buffer, tessera_query_submit,
    TesseraQuery,
};

pub use buffers::{FieldInfo, QueryBufferEntry, QueryBufferSet, Slot, OFFSET_SIZE};

use self::buffers::Catalog;
use crate::array::Array;
use crate::buffer::{copy_native, BoundBuffer, NativeBuffer};
use crate::condition::QueryCondition;
use crate::config::Config;
use crate::context::{c_string, from_c_string, Context};
use crate::datatype::{check_kind, decode_values, Datatype, Element, TypedBuffer, ValueKind};
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};
use crate::subarray::Subarray;
use crate::types::{Layout, QueryStatus, QueryType, StatusReason};

/// Estimated bytes per buffer for a complete read of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResultSize {
    /// Offset bytes; zero for fixed-sized fields.
    pub offsets: u64,
    /// Data bytes.
    pub data: u64,
    /// Validity bytes; zero for non-nullable fields.
    pub validity: u64,
}

impl ResultSize {
    /// Converts to `[offsets, values, validity]` element counts.
    pub fn elements(&self, width: u64) -> [u64; 3] {
        [self.offsets / OFFSET_SIZE, self.data / width.max(1), self.validity]
    }
}

/// A read or write query on an open array.
#[derive(Debug)]
pub struct Query {
    // Declared first so the native query is released before the buffers
    // it points at.
    handle: NativeHandle<TesseraQuery>,
    ctx: Context,
    uri: String,
    catalog: Catalog,
    state: Mutex<QueryBufferSet>,
}

impl Query {
    /// Creates a query on `array`, which must be open in `query_type` mode.
    pub fn new(array: &Array, query_type: QueryType) -> Result<Self> {
        let ctx = array.ctx().clone();
        let uri = array.uri()?;
        let catalog = Catalog::load(array)?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_query_alloc(*ctx.ptr()?, *array.ptr()?, query_type.as_u32(), &mut ptr)
        };
        ctx.check(status, "allocate query", &uri)?;
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_query_free, "query") }?;
        Ok(Self {
            handle,
            ctx,
            uri,
            catalog,
            state: Mutex::new(QueryBufferSet::default()),
        })
    }

    fn ptr(&self) -> Result<HandleGuard<'_, TesseraQuery>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraQuery>> {
        self.handle.get_mut()
    }

    /// Returns the shape of `name`: a dimension, an attribute, a dimension
    /// label, or `__coords` on sparse arrays with one domain datatype.
    pub fn field(&self, name: &str) -> Result<FieldInfo> {
        self.catalog.resolve(name)
    }

    /// Returns read or write.
    pub fn query_type(&self) -> Result<QueryType> {
        let _state = self.state.lock();
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_query_get_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
        self.ctx.check(status, "get query type", "")?;
        QueryType::from_tag(tag)
    }

    /// Sets the order cells are read or written in.
    pub fn set_layout(&self, layout: Layout) -> Result<()> {
        let _state = self.state.lock();
        // SAFETY: live handles.
        let status = unsafe {
            tessera_query_set_layout(*self.ctx.ptr()?, *self.ptr_mut()?, layout.as_u32())
        };
        self.ctx.check(status, "set layout", layout.as_str())
    }

    /// Returns the cell order.
    pub fn layout(&self) -> Result<Layout> {
        let _state = self.state.lock();
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_query_get_layout(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
        self.ctx.check(status, "get layout", "")?;
        Layout::from_tag(tag)
    }

    /// Restricts the query to `subarray`. The engine keeps a copy, so later
    /// changes to `subarray` need another call.
    pub fn set_subarray(&self, subarray: &Subarray) -> Result<()> {
        let _state = self.state.lock();
        // SAFETY: live handles.
        let status = unsafe {
            tessera_query_set_subarray(*self.ctx.ptr()?, *self.ptr_mut()?, *subarray.ptr()?)
        };
        self.ctx.check(status, "set subarray", &self.uri)
    }

    /// Filters read results with a copy of `condition`. Must come before
    /// the first submission.
    pub fn set_condition(&self, condition: &QueryCondition) -> Result<()> {
        let _state = self.state.lock();
        // SAFETY: live handles.
        let status = unsafe {
            tessera_query_set_condition(*self.ctx.ptr()?, *self.ptr_mut()?, *condition.ptr()?)
        };
        self.ctx.check(status, "set query condition", &self.uri)
    }

    /// Replaces the query's configuration, which starts as the context's.
    /// Must come before the first submission.
    pub fn set_config(&self, config: &Config) -> Result<()> {
        let _state = self.state.lock();
        // SAFETY: live handles.
        let status = unsafe {
            tessera_query_set_config(*self.ctx.ptr()?, *self.ptr_mut()?, *config.ptr()?)
        };
        self.ctx.check(status, "set query config", &self.uri)
    }

    /// Returns a copy of the query's configuration.
    pub fn config(&self) -> Result<Config> {
        let _state = self.state.lock();
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_query_get_config(*self.ctx.ptr()?, *self.ptr()?, &mut ptr) };
        self.ctx.check(status, "get query config", &self.uri)?;
        Config::from_raw(ptr)
    }

    /// Returns how many fragments this query has committed.
    pub fn fragment_num(&self) -> Result<u32> {
        let mut num = 0u32;
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_query_get_fragment_num(*self.ctx.ptr()?, *self.ptr()?, &mut num) };
        self.ctx.check(status, "get fragment count", &self.uri)?;
        Ok(num)
    }

    pub fn fragment_uri(&self, index: u64) -> Result<String> {
        let query = self.ptr_mut()?;
        let mut uri = std::ptr::null();
        // SAFETY: live handles; valid out-slot. The string stays owned by
        // the query, which the exclusive guard keeps alive while it is copied.
        let status =
            unsafe { tessera_query_get_fragment_uri(*self.ctx.ptr()?, *query, index, &mut uri) };
        self.ctx.check(status, "get fragment uri", &self.uri)?;
        // SAFETY: non-null, NUL-terminated, and alive while `query` is held.
        let uri = unsafe { from_c_string(uri) };
        drop(query);
        Ok(uri)
    }

    /// Returns the `(start, end)` timestamps, in milliseconds, of one
    /// fragment.
    pub fn fragment_timestamp_range(&self, index: u64) -> Result<(u64, u64)> {
        let (mut start, mut end) = (0u64, 0u64);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_query_get_fragment_timestamp_range(
                *self.ctx.ptr()?,
                *self.ptr()?,
                index,
                &mut start,
                &mut end,
            )
        };
        self.ctx.check(status, "get fragment timestamps", &self.uri)?;
        Ok((start, end))
    }

    // === Buffers ===

    /// Binds the data buffer of `name`, returning the buffer it replaces.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown field,
    /// [`Error::TypeMismatch`] if `T` is not the field's element type, and
    /// [`Error::EmptyBuffer`] if `values` is empty.
    pub fn set_data_buffer<T: Element>(
        &self,
        name: &str,
        values: Vec<T>,
    ) -> Result<Option<TypedBuffer>> {
        let info = self.catalog.resolve(name)?;
        check_kind::<T>(name, info.datatype)?;
        let bound = BoundBuffer::bind(name, Slot::Data.as_str(), T::into_buffer(values))?;
        let old = self.install(name, Slot::Data, bound)?;
        Ok(old.and_then(BoundBuffer::into_buffer))
    }

    /// Binds the offsets buffer of a var-sized field.
    pub fn set_offsets_buffer(&self, name: &str, offsets: Vec<u64>) -> Result<Option<Vec<u64>>> {
        self.check_slot(name, Slot::Offsets)?;
        let bound =
            BoundBuffer::bind(name, Slot::Offsets.as_str(), TypedBuffer::UInt64(offsets))?;
        let old = self.install(name, Slot::Offsets, bound)?;
        Ok(old
            .and_then(BoundBuffer::into_buffer)
            .and_then(|b| u64::from_buffer(b).ok()))
    }

    /// Binds the validity buffer of a nullable field.
    pub fn set_validity_buffer(&self, name: &str, validity: Vec<u8>) -> Result<Option<Vec<u8>>> {
        self.check_slot(name, Slot::Validity)?;
        let bound =
            BoundBuffer::bind(name, Slot::Validity.as_str(), TypedBuffer::UInt8(validity))?;
        let old = self.install(name, Slot::Validity, bound)?;
        Ok(old
            .and_then(BoundBuffer::into_buffer)
            .and_then(|b| u8::from_buffer(b).ok()))
    }

    /// Binds caller-owned memory as the data buffer of `name`. No element
    /// type check is possible.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `bytes` bytes until the
    /// binding is replaced or the query is dropped, and must not be
    /// accessed elsewhere while a submission runs.
    pub unsafe fn set_data_buffer_unsafe(
        &self,
        name: &str,
        ptr: *mut c_void,
        bytes: u64,
    ) -> Result<Option<TypedBuffer>> {
        self.catalog.resolve(name)?;
        let bound = BoundBuffer::bind_raw(name, Slot::Data.as_str(), ptr, bytes)?;
        Ok(self.install(name, Slot::Data, bound)?.and_then(BoundBuffer::into_buffer))
    }

    /// Binds caller-owned memory as the offsets buffer of `name`.
    ///
    /// # Safety
    ///
    /// As for [`Query::set_data_buffer_unsafe`]; `ptr` must also be aligned
    /// to 8 bytes.
    pub unsafe fn set_offsets_buffer_unsafe(
        &self,
        name: &str,
        ptr: *mut u64,
        bytes: u64,
    ) -> Result<()> {
        self.check_slot(name, Slot::Offsets)?;
        let bound = BoundBuffer::bind_raw(name, Slot::Offsets.as_str(), ptr.cast(), bytes)?;
        self.install(name, Slot::Offsets, bound).map(drop)
    }

    /// Binds caller-owned memory as the validity buffer of `name`.
    ///
    /// # Safety
    ///
    /// As for [`Query::set_data_buffer_unsafe`].
    pub unsafe fn set_validity_buffer_unsafe(
        &self,
        name: &str,
        ptr: *mut u8,
        bytes: u64,
    ) -> Result<()> {
        self.check_slot(name, Slot::Validity)?;
        let bound = BoundBuffer::bind_raw(name, Slot::Validity.as_str(), ptr.cast(), bytes)?;
        self.install(name, Slot::Validity, bound).map(drop)
    }

    fn check_slot(&self, name: &str, slot: Slot) -> Result<FieldInfo> {
        let info = self.catalog.resolve(name)?;
        match slot {
            Slot::Offsets if !info.var => Err(Error::invalid_argument(format!(
                "'{name}' is fixed-sized and takes no offsets"
            ))),
            Slot::Validity if !info.nullable => {
                Err(Error::invalid_argument(format!("'{name}' is not nullable")))
            }
            _ => Ok(info),
        }
    }

    /// Hands `bound` to the engine, then stores it. The binding it replaces
    /// is only released once the engine holds the new address.
    fn install(
        &self,
        name: &str,
        slot: Slot,
        mut bound: BoundBuffer,
    ) -> Result<Option<BoundBuffer>> {
        let mut state = self.state.lock();
        let c_name = c_string(name, "field name")?;
        let (ctx, query) = (self.ctx.ptr()?, self.ptr_mut()?);
        let (ptr, size) = (bound.ptr(), bound.size_ptr());
        let field = c_name.as_ptr();
        // SAFETY: live handles; `ptr` and `size` live on the heap and move
        // into the buffer set below, which outlives the native query.
        let status = unsafe {
            match slot {
                Slot::Data => tessera_query_set_data_buffer(*ctx, *query, field, ptr, size),
                Slot::Offsets => {
                    tessera_query_set_offsets_buffer(*ctx, *query, field, ptr.cast(), size)
                }
                Slot::Validity => {
                    tessera_query_set_validity_buffer(*ctx, *query, field, ptr.cast(), size)
                }
            }
        };
        drop((ctx, query));
        let operation = match slot {
            Slot::Data => "set data buffer",
            Slot::Offsets => "set offsets buffer",
            Slot::Validity => "set validity buffer",
        };
        self.ctx.check(status, operation, name)?;

        let old = state.entry(name).replace(slot, bound);
        if let Some(old) = &old {
            tracing::debug!(
                field = name,
                slot = %slot,
                old_bytes = old.capacity(),
                "replaced query buffer"
            );
        }
        Ok(old)
    }

    // === Submission ===

    /// Submits the query and blocks until the engine returns.
    ///
    /// Reads may return [`QueryStatus::Incomplete`]; drain the results and
    /// submit again to continue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferNotSet`] if a field lacks a buffer its shape
    /// needs, and [`Error::BuffersTooSmall`] if a read stopped before a
    /// single result fit.
    pub fn submit(&self) -> Result<QueryStatus> {
        let state = self.state.lock();
        state.check_complete(|name| self.catalog.resolve(name))?;
        state.reset_sizes();

        // SAFETY: live handles; every registered buffer and size cell is
        // owned by `state`, which stays locked for the call.
        let status = unsafe { tessera_query_submit(*self.ctx.ptr()?, *self.ptr_mut()?) };
        self.ctx.check(status, "submit query", &self.uri)?;

        let status = self.fetch_status()?;
        let populated = state.populated();
        tracing::debug!(uri = %self.uri, %status, populated, "query submitted");
        if status == QueryStatus::Incomplete && populated == 0 {
            return Err(Error::BuffersTooSmall { fields: state.names() });
        }
        Ok(status)
    }

    /// Flushes a global-order write. Other queries have nothing to flush.
    pub fn finalize(&self) -> Result<()> {
        let _state = self.state.lock();
        // SAFETY: live handles.
        let status = unsafe { tessera_query_finalize(*self.ctx.ptr()?, *self.ptr_mut()?) };
        self.ctx.check(status, "finalize query", &self.uri)?;
        tracing::debug!(uri = %self.uri, "query finalized");
        Ok(())
    }

    /// Returns the status of the last submission.
    pub fn status(&self) -> Result<QueryStatus> {
        let _state = self.state.lock();
        self.fetch_status()
    }

    fn fetch_status(&self) -> Result<QueryStatus> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_query_get_status(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
        self.ctx.check(status, "get query status", "")?;
        QueryStatus::from_tag(tag)
    }

    /// Returns why the last read stopped early.
    pub fn status_details(&self) -> Result<StatusReason> {
        let _state = self.state.lock();
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_query_get_status_details(*self.ctx.ptr()?, *self.ptr()?, &mut tag)
        };
        self.ctx.check(status, "get query status details", "")?;
        StatusReason::from_tag(tag)
    }

    /// Returns true if the last read delivered anything.
    pub fn has_results(&self) -> Result<bool> {
        let _state = self.state.lock();
        let mut has = 0;
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_query_has_results(*self.ctx.ptr()?, *self.ptr()?, &mut has) };
        self.ctx.check(status, "check query results", "")?;
        Ok(has != 0)
    }

    // === Results ===

    /// Returns `[offsets, values, validity]` element counts the last
    /// submission produced, per bound field.
    ///
    /// Values of `__coords` are counted in units of the domain datatype.
    pub fn result_buffer_elements(&self) -> Result<HashMap<String, [u64; 3]>> {
        self.state.lock().element_counts(|name| self.catalog.resolve(name))
    }

    /// Estimates the bytes a complete read of `name` needs.
    pub fn est_result_size(&self, name: &str) -> Result<ResultSize> {
        let info = self.catalog.resolve(name)?;
        let c_name = c_string(name, "field name")?;
        let _state = self.state.lock();
        let (ctx, query) = (self.ctx.ptr()?, self.ptr()?);
        let mut size = ResultSize::default();
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            match (info.var, info.nullable) {
                (false, false) => tessera_query_get_est_result_size(
                    *ctx,
                    *query,
                    c_name.as_ptr(),
                    &mut size.data,
                ),
                (true, false) => tessera_query_get_est_result_size_var(
                    *ctx,
                    *query,
                    c_name.as_ptr(),
                    &mut size.offsets,
                    &mut size.data,
                ),
                (false, true) => tessera_query_get_est_result_size_nullable(
                    *ctx,
                    *query,
                    c_name.as_ptr(),
                    &mut size.data,
                    &mut size.validity,
                ),
                (true, true) => tessera_query_get_est_result_size_var_nullable(
                    *ctx,
                    *query,
                    c_name.as_ptr(),
                    &mut size.offsets,
                    &mut size.data,
                    &mut size.validity,
                ),
            }
        };
        self.ctx.check(status, "estimate result size", name)?;
        Ok(size)
    }

    /// Estimates `[offsets, values, validity]` element counts for every
    /// dimension and attribute.
    pub fn estimate_buffer_elements(&self) -> Result<HashMap<String, [u64; 3]>> {
        self.catalog
            .fields()
            .map(|(name, info)| {
                let elements = self.est_result_size(name)?.elements(info.width());
                Ok((name.to_string(), elements))
            })
            .collect()
    }

    /// Copies the populated bytes of one of `name`'s buffers.
    fn copy_populated(&self, name: &str, slot: Slot) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let bound = state
            .get_mut(name)
            .and_then(|entry| entry.get_mut(slot))
            .ok_or_else(|| Error::BufferNotSet {
                name: name.to_string(),
                slot: slot.as_str(),
            })?;
        let (ptr, len) = (bound.ptr(), bound.populated());
        // SAFETY: the engine never reports more bytes than the buffer holds,
        // and the locked state keeps the memory alive.
        unsafe { copy_native(ptr, len, name) }
    }

    /// Copies the values the last submission produced for `name`.
    pub fn result_data<T: Element>(&self, name: &str) -> Result<Vec<T>> {
        let info = self.catalog.resolve(name)?;
        check_kind::<T>(name, info.datatype)?;
        let bytes = self.copy_populated(name, Slot::Data)?;
        decode_values(name, info.datatype, &bytes)
    }

    /// Copies the offsets the last submission produced for `name`.
    pub fn result_offsets(&self, name: &str) -> Result<Vec<u64>> {
        let bytes = self.copy_populated(name, Slot::Offsets)?;
        decode_values(name, Datatype::UInt64, &bytes)
    }

    /// Copies the validity bytes the last submission produced for `name`.
    pub fn result_validity(&self, name: &str) -> Result<Vec<u8>> {
        self.copy_populated(name, Slot::Validity)
    }

    /// Splits the var-sized 8-bit values of `name` into strings.
    pub fn result_strings(&self, name: &str) -> Result<Vec<String>> {
        let info = self.catalog.resolve(name)?;
        if !info.var {
            return Err(Error::invalid_argument(format!("'{name}' is not var-sized")));
        }
        if info.datatype.value_kind() != ValueKind::UInt8 {
            return Err(Error::type_mismatch(name, "an 8-bit string datatype", info.datatype));
        }
        let offsets = self.result_offsets(name)?;
        let data = self.copy_populated(name, Slot::Data)?;
        split_values(name, &offsets, &data)
    }

    /// Borrows the populated values of an owned data buffer without
    /// copying. The query stays locked while the guard lives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for `bool`, whose values are stored
    /// as bytes, and [`Error::BufferNotSet`] if `name` has no owned data
    /// buffer.
    pub fn data_buffer<T: Element>(&self, name: &str) -> Result<MappedMutexGuard<'_, [T]>> {
        let info = self.catalog.resolve(name)?;
        check_kind::<T>(name, info.datatype)?;
        if T::KIND == ValueKind::Bool {
            return Err(Error::type_mismatch(name, "u8", "bool"));
        }
        let width = info.width();
        MutexGuard::try_map(self.state.lock(), |set| {
            let bound = set.get_mut(name)?.get_mut(Slot::Data)?;
            let len = usize::try_from(bound.populated() / width).ok()?;
            T::slice_mut(bound.buffer_mut()?)?.get_mut(..len)
        })
        .map_err(|_| Error::BufferNotSet {
            name: name.to_string(),
            slot: Slot::Data.as_str(),
        })
    }

    /// Returns the address and size cell the engine has for a slot.
    fn registration(&self, name: &str, slot: Slot) -> Result<(*mut c_void, *mut u64)> {
        self.catalog.resolve(name)?;
        let c_name = c_string(name, "field name")?;
        let (ctx, query) = (self.ctx.ptr()?, self.ptr()?);
        let field = c_name.as_ptr();
        let mut size = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slots.
        let (status, ptr) = unsafe {
            match slot {
                Slot::Data => {
                    let mut ptr = std::ptr::null_mut();
                    let status =
                        tessera_query_get_data_buffer(*ctx, *query, field, &mut ptr, &mut size);
                    (status, ptr)
                }
                Slot::Offsets => {
                    let mut ptr = std::ptr::null_mut();
                    let status =
                        tessera_query_get_offsets_buffer(*ctx, *query, field, &mut ptr, &mut size);
                    (status, ptr.cast::<c_void>())
                }
                Slot::Validity => {
                    let mut ptr = std::ptr::null_mut();
                    let status =
                        tessera_query_get_validity_buffer(*ctx, *query, field, &mut ptr, &mut size);
                    (status, ptr.cast::<c_void>())
                }
            }
        };
        self.ctx.check(status, "get buffer", name)?;
        Ok((ptr, size))
    }

    fn expected_len(&self, name: &str, slot: Slot) -> Result<u64> {
        let _state = self.state.lock();
        let (_, size) = self.registration(name, slot)?;
        if size.is_null() {
            return Ok(0);
        }
        // SAFETY: the cell belongs to a binding in the locked state.
        Ok(unsafe { size.read() })
    }

    /// Returns the byte length the engine holds for the data buffer of
    /// `name`, or 0 if none is bound.
    pub fn expected_data_len(&self, name: &str) -> Result<u64> {
        self.expected_len(name, Slot::Data)
    }

    /// As [`Query::expected_data_len`], for offsets.
    pub fn expected_offsets_len(&self, name: &str) -> Result<u64> {
        self.expected_len(name, Slot::Offsets)
    }

    /// As [`Query::expected_data_len`], for validity.
    pub fn expected_validity_len(&self, name: &str) -> Result<u64> {
        self.expected_len(name, Slot::Validity)
    }

    /// Runs `read` over the data buffer the engine holds for `name`, as
    /// reported by the engine rather than by the binding.
    pub fn native_data<R>(
        &self,
        name: &str,
        read: impl FnOnce(NativeBuffer<'_>) -> Result<R>,
    ) -> Result<R> {
        let _state = self.state.lock();
        let (ptr, size) = self.registration(name, Slot::Data)?;
        // SAFETY: the cell belongs to a binding in the locked state.
        let len = if size.is_null() { 0 } else { unsafe { size.read() } };
        // SAFETY: a non-null address was registered for at least `len`
        // bytes and stays bound while `_state` is held.
        read(unsafe { NativeBuffer::new(ptr, len) })
    }

    /// Releases the native query, returning every bound buffer.
    pub fn into_buffers(self) -> QueryBufferSet {
        let Self { handle, state, .. } = self;
        handle.free();
        drop(handle);
        state.into_inner()
    }

    /// Releases the native query once calls in flight finish. Bound
    /// buffers live until the query drops.
    pub fn free(&self) {
        let _state = self.state.lock();
        self.handle.free();
    }
}

/// Splits `data` at `offsets` into strings.
fn split_values(name: &str, offsets: &[u64], data: &[u8]) -> Result<Vec<String>> {
    let ends = offsets.iter().skip(1).copied().chain(std::iter::once(data.len() as u64));
    offsets
        .iter()
        .zip(ends)
        .map(|(&start, end)| {
            let bytes = usize::try_from(start)
                .ok()
                .zip(usize::try_from(end).ok())
                .and_then(|(start, end)| data.get(start..end))
                .ok_or_else(|| {
                    Error::invalid_argument(format!(
                        "'{name}': offsets {start}..{end} fall outside {} data bytes",
                        data.len()
                    ))
                })?;
            Ok(String::from_utf8_lossy(bytes).into_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::COORDS;
    use crate::{ArraySchema, ArrayType, Attribute, Dimension, Domain};

    fn dense(ctx: &Context) -> Array {
        let domain = Domain::new(ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(ctx, "d", Datatype::Int32, [1, 10], None).unwrap())
            .unwrap();
        let schema = ArraySchema::new(ctx, ArrayType::Dense).unwrap();
        schema.set_domain(&domain).unwrap();
        schema
            .add_attribute(&Attribute::new(ctx, "a", Datatype::Int32).unwrap())
            .unwrap();
        let uri = format!("mem://binding-query/{}", uuid::Uuid::new_v4());
        let array = Array::new(ctx, &uri).unwrap();
        array.create(&schema).unwrap();
        array
    }

    fn write_all(array: &Array) {
        array.open(QueryType::Write).unwrap();
        let query = Query::new(array, QueryType::Write).unwrap();
        query.set_data_buffer("a", (1..=10).collect::<Vec<i32>>()).unwrap();
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        array.close().unwrap();
    }

    #[test]
    fn buffers_are_checked_before_binding() {
        let ctx = Context::new(None).unwrap();
        let array = dense(&ctx);
        array.open(QueryType::Read).unwrap();
        let query = Query::new(&array, QueryType::Read).unwrap();

        assert!(query.set_data_buffer("a", vec![0i64; 4]).unwrap_err().is_type_mismatch());
        assert!(query.set_data_buffer("nope", vec![0i32; 4]).unwrap_err().is_not_found());
        assert!(matches!(
            query.set_data_buffer("a", Vec::<i32>::new()),
            Err(Error::EmptyBuffer { slot: "data", .. })
        ));
        assert!(matches!(
            query.set_offsets_buffer("a", vec![0; 4]),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(query.set_validity_buffer("a", vec![0; 4]).is_err());
        assert!(query.field(COORDS).unwrap_err().is_not_found());
        assert_eq!(query.query_type().unwrap(), QueryType::Read);
        assert_eq!(query.expected_data_len("a").unwrap(), 0);
    }

    #[test]
    fn rebinding_replaces_and_returns_the_old_buffer() {
        let ctx = Context::new(None).unwrap();
        let array = dense(&ctx);
        write_all(&array);
        array.open(QueryType::Read).unwrap();
        let query = Query::new(&array, QueryType::Read).unwrap();

        assert!(query.set_data_buffer("a", vec![0i32; 2]).unwrap().is_none());
        let old = query.set_data_buffer("a", vec![0i32; 10]).unwrap();
        assert_eq!(old, Some(TypedBuffer::Int32(vec![0, 0])));
        assert_eq!(query.expected_data_len("a").unwrap(), 40);

        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.result_data::<i32>("a").unwrap(), (1..=10).collect::<Vec<_>>());
        assert!(query.has_results().unwrap());
        assert_eq!(query.result_buffer_elements().unwrap()["a"], [0, 10, 0]);
        {
            let values = query.data_buffer::<i32>("a").unwrap();
            assert_eq!(values.len(), 10);
            assert_eq!(values[9], 10);
        }
        assert!(query.data_buffer::<u32>("a").unwrap_err().is_type_mismatch());
        query.native_data("a", |view| {
            assert_eq!(view.len(), 40);
            Ok(())
        })
        .unwrap();

        let buffers = query.into_buffers();
        let entry = buffers.get("a").unwrap();
        assert_eq!(entry.get(Slot::Data).unwrap().populated(), 40);
    }

    #[test]
    fn incomplete_reads_resume_and_report_tiny_buffers() {
        let ctx = Context::new(None).unwrap();
        let array = dense(&ctx);
        write_all(&array);
        array.open(QueryType::Read).unwrap();

        let query = Query::new(&array, QueryType::Read).unwrap();
        query.set_data_buffer("a", vec![0i32; 6]).unwrap();
        assert_eq!(query.est_result_size("a").unwrap().data, 40);
        assert_eq!(query.estimate_buffer_elements().unwrap()["a"], [0, 10, 0]);

        assert_eq!(query.submit().unwrap(), QueryStatus::Incomplete);
        assert_eq!(query.status_details().unwrap(), StatusReason::UserBufferSize);
        assert_eq!(query.result_data::<i32>("a").unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
        assert_eq!(query.result_data::<i32>("a").unwrap(), vec![7, 8, 9, 10]);
        assert_eq!(query.status().unwrap(), QueryStatus::Completed);

        // Two bytes cannot hold a single `i32`.
        let mut two = [0u8; 2];
        let small = Query::new(&array, QueryType::Read).unwrap();
        // SAFETY: `two` outlives `small`.
        unsafe { small.set_data_buffer_unsafe("a", two.as_mut_ptr().cast(), 2) }.unwrap();
        let err = small.submit().unwrap_err();
        assert!(
            matches!(err, Error::BuffersTooSmall { ref fields } if fields == &["a".to_string()])
        );
        assert_eq!(small.status().unwrap(), QueryStatus::Incomplete);
    }

    #[test]
    fn writes_need_every_buffer_and_unbacked_memory_is_reported() {
        let ctx = Context::new(None).unwrap();
        let array = dense(&ctx);
        array.open(QueryType::Write).unwrap();
        assert!(Query::new(&array, QueryType::Read).is_err());
        let query = Query::new(&array, QueryType::Write).unwrap();
        assert_eq!(query.layout().unwrap(), Layout::RowMajor);
        query.set_layout(Layout::ColMajor).unwrap();
        assert_eq!(query.layout().unwrap(), Layout::ColMajor);

        // SAFETY: never submitted; only the reported length is inspected.
        unsafe { query.set_data_buffer_unsafe("a", std::ptr::null_mut(), 16) }.unwrap();
        assert_eq!(query.expected_data_len("a").unwrap(), 16);
        let err = query.native_data("a", |view| view.read_back("a")).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { expected: 16, .. }));
    }

    #[test]
    fn strings_split_at_offsets() {
        let data = b"abcde";
        assert_eq!(split_values("s", &[0, 1, 3], data).unwrap(), ["a", "bc", "de"]);
        assert_eq!(split_values("s", &[0, 0], b"x").unwrap(), ["", "x"]);
        assert!(split_values("s", &[0, 9], data).is_err());
        assert!(split_values("s", &[], data).unwrap().is_empty());
    }
}
