//! Query functions.
//!
//! A query keeps raw pointers to the caller's buffers between registration
//! and submission. The caller must keep those buffers alive, and must not
//! touch them while a submission runs.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_void, CString};

use tessera_engine::{FieldInput, FieldOutput, FieldShape, FieldSizes, Layout, Query, QueryType};

use crate::buffer::{str_arg, write_out, FieldBuffers, RawBuffer};
use crate::context::{enum_arg, ConfigObject};
use crate::error::{guard, FfiError, FfiResult, TesseraResult};
use crate::types::{
    Opaque, TesseraArray, TesseraConfig, TesseraCtx, TesseraQuery, TesseraQueryCondition,
    TesseraSubarray,
};

/// The object behind a query handle.
#[derive(Debug)]
pub struct QueryObject {
    query: Query,
    buffers: BTreeMap<String, FieldBuffers>,
    fragment_uris: Vec<CString>,
}

impl QueryObject {
    fn shape(&self, name: &str) -> FfiResult<FieldShape> {
        Ok(self.query.field_shape(name)?)
    }

    fn entry(&mut self, name: &str) -> &mut FieldBuffers {
        self.buffers.entry(name.to_string()).or_default()
    }

    fn registered(&self, name: &str) -> FfiResult<FieldBuffers> {
        self.shape(name)?;
        Ok(self.buffers.get(name).copied().unwrap_or_default())
    }

    unsafe fn submit(&mut self) -> FfiResult<()> {
        match self.query.query_type() {
            QueryType::Write => self.submit_write(),
            QueryType::Read => self.submit_read(),
        }
    }

    unsafe fn submit_write(&mut self) -> FfiResult<()> {
        let mut inputs = HashMap::with_capacity(self.buffers.len());
        for (name, buffers) in &self.buffers {
            let data = buffers
                .data
                .ok_or_else(|| {
                    FfiError::invalid_argument(format!("no data buffer set for '{name}'"))
                })?;
            let input = FieldInput {
                data: data.view(name)?,
                offsets: buffers.offsets.map(|b| b.view(name)).transpose()?,
                validity: buffers.validity.map(|b| b.view(name)).transpose()?,
            };
            inputs.insert(name.clone(), input);
        }
        self.query.submit_write(&inputs)?;
        Ok(())
    }

    unsafe fn submit_read(&mut self) -> FfiResult<()> {
        let mut outputs = HashMap::with_capacity(self.buffers.len());
        for (name, buffers) in &self.buffers {
            let data = buffers
                .data
                .ok_or_else(|| {
                    FfiError::invalid_argument(format!("no data buffer set for '{name}'"))
                })?;
            let output = FieldOutput {
                data: data.view_mut(name)?,
                offsets: buffers.offsets.map(|b| b.view_mut(name)).transpose()?,
                validity: buffers.validity.map(|b| b.view_mut(name)).transpose()?,
            };
            outputs.insert(name.clone(), output);
        }
        let sizes = self.query.submit_read(&mut outputs)?;
        drop(outputs);
        for (name, buffers) in &self.buffers {
            let used = sizes.get(name).copied().unwrap_or_default();
            if let Some(data) = buffers.data {
                data.set_size(used.data);
            }
            if let Some(offsets) = buffers.offsets {
                offsets.set_size(used.offsets);
            }
            if let Some(validity) = buffers.validity {
                validity.set_size(used.validity);
            }
        }
        Ok(())
    }
}

/// Allocates a query on an open array. `query_type` must match the mode
/// the array was opened in.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `query_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_alloc(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    query_type: u32,
    query_out: *mut *mut TesseraQuery,
) -> TesseraResult {
    guard(ctx, "tessera_query_alloc", |ctx| {
        let query_type = enum_arg(query_type, "query type", QueryType::from_u32)?;
        let array = TesseraArray::get_ref(array)?.lock();
        let opened = array.query_type()?;
        if opened != query_type {
            return Err(FfiError::invalid_argument(format!(
                "array is open for {opened}, not {query_type}"
            )));
        }
        let query = Query::new(&array, ctx.engine_config()?, ctx.cancel_token().clone())?;
        write_out(
            query_out,
            "query_out",
            TesseraQuery::wrap(QueryObject {
                query,
                buffers: BTreeMap::new(),
                fragment_uris: Vec::new(),
            }),
        )
    })
}

/// Frees a query and nulls the handle.
///
/// # Safety
///
/// `query` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_free(query: *mut *mut TesseraQuery) {
    TesseraQuery::release(query);
}

/// Returns the query type tag.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_type(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_type", |_| {
        let query_type = TesseraQuery::get_ref(query)?.query.query_type();
        write_out(type_out, "type_out", query_type.as_u32())
    })
}

/// Sets the layout tag.
///
/// # Safety
///
/// `ctx` and `query` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_layout(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    layout: u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_layout", |_| {
        let layout = enum_arg(layout, "layout", Layout::from_u32)?;
        TesseraQuery::get_mut(query)?.query.set_layout(layout)?;
        Ok(())
    })
}

/// Returns the layout tag.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `layout_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_layout(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    layout_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_layout", |_| {
        let layout = TesseraQuery::get_ref(query)?.query.layout();
        write_out(layout_out, "layout_out", layout.as_u32())
    })
}

/// Copies a subarray into the query.
///
/// # Safety
///
/// `ctx`, `query` and `subarray` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_subarray(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    subarray: *mut TesseraSubarray,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_subarray", |_| {
        let subarray = TesseraSubarray::get_ref(subarray)?.subarray();
        TesseraQuery::get_mut(query)?.query.set_subarray(subarray)?;
        Ok(())
    })
}

/// Registers the data buffer of a field.
///
/// # Arguments
///
/// * `name` - Attribute, dimension or `__coords`
/// * `buffer` - Values; may be null while `*size` is 0
/// * `size` - Byte size of the buffer; updated by read submissions
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `buffer` and `size` must stay valid until replaced or the query is
///   freed
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_data_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer: *mut c_void,
    size: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_data_buffer", |_| {
        let name = str_arg(name, "name")?;
        let query = TesseraQuery::get_mut(query)?;
        query.shape(name)?;
        let raw = RawBuffer::new(buffer.cast::<u8>(), size, "size")?;
        query.entry(name).data = Some(raw);
        Ok(())
    })
}

/// Registers the offsets buffer of a var-sized field.
///
/// # Safety
///
/// As for `tessera_query_set_data_buffer`; `buffer` must be 8-byte aligned.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_offsets_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer: *mut u64,
    size: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_offsets_buffer", |_| {
        let name = str_arg(name, "name")?;
        let query = TesseraQuery::get_mut(query)?;
        if !query.shape(name)?.var {
            return Err(FfiError::invalid_argument(format!(
                "'{name}' is fixed-sized and takes no offsets"
            )));
        }
        let raw = RawBuffer::new(buffer, size, "size")?;
        query.entry(name).offsets = Some(raw);
        Ok(())
    })
}

/// Registers the validity buffer of a nullable field.
///
/// # Safety
///
/// As for `tessera_query_set_data_buffer`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_validity_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer: *mut u8,
    size: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_validity_buffer", |_| {
        let name = str_arg(name, "name")?;
        let query = TesseraQuery::get_mut(query)?;
        if !query.shape(name)?.nullable {
            return Err(FfiError::invalid_argument(format!(
                "'{name}' is not nullable"
            )));
        }
        let raw = RawBuffer::new(buffer, size, "size")?;
        query.entry(name).validity = Some(raw);
        Ok(())
    })
}

unsafe fn write_registration<T>(
    raw: Option<RawBuffer<T>>,
    buffer_out: *mut *mut T,
    size_out: *mut *mut u64,
) -> FfiResult<()> {
    let (ptr, size) = raw.map_or((std::ptr::null_mut(), std::ptr::null_mut()), |r| {
        (r.ptr(), r.size_cell())
    });
    write_out(buffer_out, "buffer_out", ptr)?;
    write_out(size_out, "size_out", size)
}

/// Returns the registered data buffer and size cell, or nulls.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `buffer_out` and `size_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_data_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer_out: *mut *mut c_void,
    size_out: *mut *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_data_buffer", |_| {
        let name = str_arg(name, "name")?;
        let data = TesseraQuery::get_ref(query)?.registered(name)?.data;
        write_registration(data, buffer_out.cast::<*mut u8>(), size_out)
    })
}

/// Returns the registered offsets buffer and size cell, or nulls.
///
/// # Safety
///
/// As for `tessera_query_get_data_buffer`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_offsets_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer_out: *mut *mut u64,
    size_out: *mut *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_offsets_buffer", |_| {
        let name = str_arg(name, "name")?;
        let offsets = TesseraQuery::get_ref(query)?.registered(name)?.offsets;
        write_registration(offsets, buffer_out, size_out)
    })
}

/// Returns the registered validity buffer and size cell, or nulls.
///
/// # Safety
///
/// As for `tessera_query_get_data_buffer`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_validity_buffer(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    buffer_out: *mut *mut u8,
    size_out: *mut *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_validity_buffer", |_| {
        let name = str_arg(name, "name")?;
        let validity = TesseraQuery::get_ref(query)?.registered(name)?.validity;
        write_registration(validity, buffer_out, size_out)
    })
}

/// Submits the query.
///
/// Writes consume every registered buffer. Reads fill them and store the
/// bytes used in each size cell; check the status afterwards, since a read
/// may stop early and expect another submission.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - Every registered buffer and size cell must still be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_query_submit(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
) -> TesseraResult {
    guard(ctx, "tessera_query_submit", |_| {
        TesseraQuery::get_mut(query)?.submit()
    })
}

/// Flushes a global-order write.
///
/// # Safety
///
/// `ctx` and `query` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_finalize(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
) -> TesseraResult {
    guard(ctx, "tessera_query_finalize", |_| {
        TesseraQuery::get_mut(query)?.query.finalize()?;
        Ok(())
    })
}

/// Filters the results of a read query. Must be called before the first
/// submission; the query keeps its own copy of the condition.
///
/// # Safety
///
/// `ctx`, `query` and `cond` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_condition(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    cond: *mut TesseraQueryCondition,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_condition", |_| {
        let condition = TesseraQueryCondition::get_ref(cond)?.condition();
        TesseraQuery::get_mut(query)?
            .query
            .set_condition(condition)?;
        Ok(())
    })
}

/// Replaces the query's configuration with the parameters of `config`.
/// Must be called before the first submission.
///
/// # Safety
///
/// `ctx`, `query` and `config` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_set_config(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    config: *mut TesseraConfig,
) -> TesseraResult {
    guard(ctx, "tessera_query_set_config", |_| {
        let config = TesseraConfig::get_ref(config)?.engine_config()?;
        TesseraQuery::get_mut(query)?.query.set_config(config)?;
        Ok(())
    })
}

/// Returns a new configuration handle holding the query's parameters.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `config_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_config(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    config_out: *mut *mut TesseraConfig,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_config", |_| {
        let config = TesseraQuery::get_ref(query)?.query.config();
        write_out(
            config_out,
            "config_out",
            TesseraConfig::wrap(ConfigObject::from_engine(config)),
        )
    })
}

/// Returns the number of fragments the query has written.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_fragment_num(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    num_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_fragment_num", |_| {
        let num = TesseraQuery::get_ref(query)?.query.fragment_num();
        write_out(num_out, "num_out", num as u32)
    })
}

/// Returns the URI of the written fragment at `index`. The string belongs
/// to the query handle.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `uri_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_fragment_uri(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    index: u64,
    uri_out: *mut *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_fragment_uri", |_| {
        let object = TesseraQuery::get_mut(query)?;
        object.query.fragment(index as usize)?;
        while object.fragment_uris.len() < object.query.fragment_num() {
            let fragment = object.query.fragment(object.fragment_uris.len())?;
            let uri = CString::new(fragment.uri(object.query.array_uri()))
                .map_err(|_| FfiError::invalid_argument("fragment URI contains NUL"))?;
            object.fragment_uris.push(uri);
        }
        let ptr = object
            .fragment_uris
            .get(index as usize)
            .map_or(std::ptr::null(), |u| u.as_ptr());
        write_out(uri_out, "uri_out", ptr)
    })
}

/// Returns the timestamp range of the written fragment at `index`.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `start_out` and `end_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_fragment_timestamp_range(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    index: u64,
    start_out: *mut u64,
    end_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_fragment_timestamp_range", |_| {
        let fragment = TesseraQuery::get_ref(query)?.query.fragment(index as usize)?;
        write_out(start_out, "start_out", fragment.timestamp())?;
        write_out(end_out, "end_out", fragment.timestamp())
    })
}

/// Returns the status tag.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `status_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_status(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    status_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_status", |_| {
        let status = TesseraQuery::get_ref(query)?.query.status();
        write_out(status_out, "status_out", status.as_u32())
    })
}

/// Returns why the last read stopped early.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `reason_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_status_details(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    reason_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_status_details", |_| {
        let reason = TesseraQuery::get_ref(query)?.query.status_reason();
        write_out(reason_out, "reason_out", reason.as_u32())
    })
}

/// Returns 1 if the last read delivered any bytes.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `has_results_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_has_results(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    has_results_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_query_has_results", |_| {
        let has = TesseraQuery::get_ref(query)?.query.has_results();
        write_out(has_results_out, "has_results_out", i32::from(has))
    })
}

unsafe fn estimate(query: *mut TesseraQuery, name: *const c_char) -> FfiResult<FieldSizes> {
    let name = str_arg(name, "name")?;
    Ok(TesseraQuery::get_ref(query)?.query.est_result_size(name)?)
}

/// Estimates the data bytes a complete read of a field would produce.
///
/// # Safety
///
/// - `ctx` and `query` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - Every out-pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_est_result_size(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_est_result_size", |_| {
        let sizes = estimate(query, name)?;
        write_out(size_out, "size_out", sizes.data)
    })
}

/// Estimates offset and data bytes for a var-sized field.
///
/// # Safety
///
/// As for `tessera_query_get_est_result_size`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_est_result_size_var(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    offsets_size_out: *mut u64,
    data_size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_est_result_size_var", |_| {
        let sizes = estimate(query, name)?;
        write_out(offsets_size_out, "offsets_size_out", sizes.offsets)?;
        write_out(data_size_out, "data_size_out", sizes.data)
    })
}

/// Estimates data and validity bytes for a nullable field.
///
/// # Safety
///
/// As for `tessera_query_get_est_result_size`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_est_result_size_nullable(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    data_size_out: *mut u64,
    validity_size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_est_result_size_nullable", |_| {
        let sizes = estimate(query, name)?;
        write_out(data_size_out, "data_size_out", sizes.data)?;
        write_out(validity_size_out, "validity_size_out", sizes.validity)
    })
}

/// Estimates offset, data and validity bytes for a var-sized nullable field.
///
/// # Safety
///
/// As for `tessera_query_get_est_result_size`.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_get_est_result_size_var_nullable(
    ctx: *mut TesseraCtx,
    query: *mut TesseraQuery,
    name: *const c_char,
    offsets_size_out: *mut u64,
    data_size_out: *mut u64,
    validity_size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_query_get_est_result_size_var_nullable", |_| {
        let sizes = estimate(query, name)?;
        write_out(offsets_size_out, "offsets_size_out", sizes.offsets)?;
        write_out(data_size_out, "data_size_out", sizes.data)?;
        write_out(validity_size_out, "validity_size_out", sizes.validity)
    })
}
