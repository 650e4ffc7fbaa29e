//! Subarray functions.
//!
//! Fixed-sized ranges cross as pointers to single values of the dimension's
//! datatype; var-sized ranges as byte strings with explicit lengths.

use std::ffi::{c_char, c_void};

use tessera_engine::{RangeBytes, Subarray};

use crate::buffer::{bytes_arg, copy_out, str_arg, write_out};
use crate::error::{guard, FfiError, FfiResult, TesseraResult};
use crate::types::{Opaque, TesseraArray, TesseraConfig, TesseraCtx, TesseraSubarray};

/// The object behind a subarray handle.
#[derive(Debug)]
pub struct SubarrayObject {
    subarray: Subarray,
}

impl SubarrayObject {
    pub(crate) fn subarray(&self) -> &Subarray {
        &self.subarray
    }
}

fn dim_width(subarray: &Subarray, dim: usize) -> FfiResult<u64> {
    Ok(subarray.schema().domain()?.dimension(dim)?.datatype().size())
}

fn check_var(subarray: &Subarray, dim: usize, var: bool) -> FfiResult<()> {
    let dimension = subarray.schema().domain()?.dimension(dim)?;
    if dimension.is_var() == var {
        Ok(())
    } else {
        Err(FfiError::invalid_argument(format!(
            "dimension '{}' is {}",
            dimension.name(),
            if var { "fixed-sized" } else { "var-sized" }
        )))
    }
}

fn no_stride(stride: *const c_void) -> FfiResult<()> {
    if stride.is_null() {
        Ok(())
    } else {
        Err(FfiError::NotSupported {
            message: "range strides".to_string(),
        })
    }
}

unsafe fn add_fixed(
    subarray: &mut Subarray,
    dim: usize,
    start: *const c_void,
    end: *const c_void,
    stride: *const c_void,
) -> FfiResult<()> {
    no_stride(stride)?;
    let width = dim_width(subarray, dim)?;
    let start = bytes_arg(start, width, "start")?;
    let end = bytes_arg(end, width, "end")?;
    subarray.add_range(dim, start, end)?;
    Ok(())
}

unsafe fn add_var(
    subarray: &mut Subarray,
    dim: usize,
    start: *const c_void,
    start_size: u64,
    end: *const c_void,
    end_size: u64,
) -> FfiResult<()> {
    let start = bytes_arg(start, start_size, "start")?;
    let end = bytes_arg(end, end_size, "end")?;
    subarray.add_range_var(dim, start, end)?;
    Ok(())
}

fn fixed_range(subarray: &Subarray, dim: usize, index: u64) -> FfiResult<&RangeBytes> {
    check_var(subarray, dim, false)?;
    Ok(subarray.range(dim, index)?)
}

fn var_range(subarray: &Subarray, dim: usize, index: u64) -> FfiResult<&RangeBytes> {
    check_var(subarray, dim, true)?;
    Ok(subarray.range(dim, index)?)
}

unsafe fn write_range_ptrs(
    range: &RangeBytes,
    start_out: *mut *const c_void,
    end_out: *mut *const c_void,
    stride_out: *mut *const c_void,
) -> FfiResult<()> {
    write_out(start_out, "start_out", range.start.as_ptr().cast())?;
    write_out(end_out, "end_out", range.end.as_ptr().cast())?;
    if !stride_out.is_null() {
        *stride_out = std::ptr::null();
    }
    Ok(())
}

/// Allocates a subarray covering the whole domain of an open array.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `subarray_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_alloc(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    subarray_out: *mut *mut TesseraSubarray,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_alloc", |ctx| {
        let schema = TesseraArray::get_ref(array)?.lock().schema()?;
        let subarray = Subarray::new(schema, ctx.engine_config()?)?;
        write_out(
            subarray_out,
            "subarray_out",
            TesseraSubarray::wrap(SubarrayObject { subarray }),
        )
    })
}

/// Frees a subarray and nulls the handle.
///
/// # Safety
///
/// `subarray` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_free(subarray: *mut *mut TesseraSubarray) {
    TesseraSubarray::release(subarray);
}

/// Applies a configuration to ranges added afterwards.
///
/// # Safety
///
/// `ctx`, `subarray` and `config` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_set_config(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    config: *mut TesseraConfig,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_set_config", |_| {
        let config = TesseraConfig::get_ref(config)?.engine_config()?;
        TesseraSubarray::get_mut(subarray)?.subarray.set_config(config);
        Ok(())
    })
}

/// Enables or disables merging of adjacent integer ranges.
///
/// # Safety
///
/// `ctx` and `subarray` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_set_coalesce_ranges(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    coalesce: u8,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_set_coalesce_ranges", |_| {
        TesseraSubarray::get_mut(subarray)?
            .subarray
            .set_coalesce_ranges(coalesce != 0);
        Ok(())
    })
}

/// Adds a range on a fixed-sized dimension.
///
/// # Arguments
///
/// * `dim_idx` - Dimension index
/// * `start`, `end` - One value each of the dimension's datatype
/// * `stride` - Must be null
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `start` and `end` must point to one value of the datatype
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_add_range(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    start: *const c_void,
    end: *const c_void,
    stride: *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_add_range", |_| {
        let subarray = &mut TesseraSubarray::get_mut(subarray)?.subarray;
        add_fixed(subarray, dim_idx as usize, start, end, stride)
    })
}

/// Adds a range on the named fixed-sized dimension.
///
/// # Safety
///
/// As for `tessera_subarray_add_range`; `name` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_add_range_by_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    start: *const c_void,
    end: *const c_void,
    stride: *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_add_range_by_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &mut TesseraSubarray::get_mut(subarray)?.subarray;
        let dim = subarray.dim_index(name)?;
        add_fixed(subarray, dim, start, end, stride)
    })
}

/// Adds a string range on a var-sized dimension.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `start` and `end` must point to `start_size` and `end_size` bytes
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_add_range_var(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    start: *const c_void,
    start_size: u64,
    end: *const c_void,
    end_size: u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_add_range_var", |_| {
        let subarray = &mut TesseraSubarray::get_mut(subarray)?.subarray;
        add_var(subarray, dim_idx as usize, start, start_size, end, end_size)
    })
}

/// Adds a string range on the named var-sized dimension.
///
/// # Safety
///
/// As for `tessera_subarray_add_range_var`; `name` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_add_range_var_by_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    start: *const c_void,
    start_size: u64,
    end: *const c_void,
    end_size: u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_add_range_var_by_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &mut TesseraSubarray::get_mut(subarray)?.subarray;
        let dim = subarray.dim_index(name)?;
        add_var(subarray, dim, start, start_size, end, end_size)
    })
}

/// Returns the number of ranges on a dimension.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_num(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    num_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_num", |_| {
        let num = TesseraSubarray::get_ref(subarray)?
            .subarray
            .range_num(dim_idx as usize)?;
        write_out(num_out, "num_out", num)
    })
}

/// Returns the number of ranges on the named dimension.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_num_from_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    num_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_num_from_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        write_out(num_out, "num_out", subarray.range_num(subarray.dim_index(name)?)?)
    })
}

/// Returns pointers to the start and end of a fixed-sized range.
///
/// The pointers address subarray memory and stay valid until the subarray
/// is modified or freed. `stride_out`, if non-null, receives null.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `start_out` and `end_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    range_idx: u64,
    start_out: *mut *const c_void,
    end_out: *mut *const c_void,
    stride_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range", |_| {
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = fixed_range(subarray, dim_idx as usize, range_idx)?;
        write_range_ptrs(range, start_out, end_out, stride_out)
    })
}

/// Same as `tessera_subarray_get_range`, by dimension name.
///
/// # Safety
///
/// As for `tessera_subarray_get_range`; `name` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_from_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    range_idx: u64,
    start_out: *mut *const c_void,
    end_out: *mut *const c_void,
    stride_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_from_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = fixed_range(subarray, subarray.dim_index(name)?, range_idx)?;
        write_range_ptrs(range, start_out, end_out, stride_out)
    })
}

/// Returns the byte lengths of a var-sized range's start and end.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `start_size_out` and `end_size_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_var_size(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    range_idx: u64,
    start_size_out: *mut u64,
    end_size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_var_size", |_| {
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = var_range(subarray, dim_idx as usize, range_idx)?;
        write_out(start_size_out, "start_size_out", range.start.len() as u64)?;
        write_out(end_size_out, "end_size_out", range.end.len() as u64)
    })
}

/// Same as `tessera_subarray_get_range_var_size`, by dimension name.
///
/// # Safety
///
/// As for `tessera_subarray_get_range_var_size`; `name` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_var_size_from_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    range_idx: u64,
    start_size_out: *mut u64,
    end_size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_var_size_from_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = var_range(subarray, subarray.dim_index(name)?, range_idx)?;
        write_out(start_size_out, "start_size_out", range.start.len() as u64)?;
        write_out(end_size_out, "end_size_out", range.end.len() as u64)
    })
}

/// Copies a var-sized range into caller buffers sized by
/// `tessera_subarray_get_range_var_size`.
///
/// # Safety
///
/// - `ctx` and `subarray` must be valid handles
/// - `start` and `end` must be writable for the reported sizes
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_var(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    dim_idx: u32,
    range_idx: u64,
    start: *mut c_void,
    end: *mut c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_var", |_| {
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = var_range(subarray, dim_idx as usize, range_idx)?;
        copy_out(start, "start", &range.start)?;
        copy_out(end, "end", &range.end)
    })
}

/// Same as `tessera_subarray_get_range_var`, by dimension name.
///
/// # Safety
///
/// As for `tessera_subarray_get_range_var`; `name` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_subarray_get_range_var_from_name(
    ctx: *mut TesseraCtx,
    subarray: *mut TesseraSubarray,
    name: *const c_char,
    range_idx: u64,
    start: *mut c_void,
    end: *mut c_void,
) -> TesseraResult {
    guard(ctx, "tessera_subarray_get_range_var_from_name", |_| {
        let name = str_arg(name, "name")?;
        let subarray = &TesseraSubarray::get_ref(subarray)?.subarray;
        let range = var_range(subarray, subarray.dim_index(name)?, range_idx)?;
        copy_out(start, "start", &range.start)?;
        copy_out(end, "end", &range.end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::tests::{c, create_int_array, new_ctx, open_array};
    use crate::array::tessera_array_free;
    use crate::context::tessera_ctx_free;
    use tessera_engine::{ArrayType, QueryType};

    #[test]
    fn fixed_ranges() {
        unsafe {
            let mut ctx = new_ctx();
            let uri = create_int_array(ctx, ArrayType::Dense);
            let mut array = open_array(ctx, &uri, QueryType::Read);
            let mut sub = std::ptr::null_mut();
            assert!(tessera_subarray_alloc(ctx, array, &mut sub).is_ok());

            let mut num = 0;
            assert!(tessera_subarray_get_range_num(ctx, sub, 0, &mut num).is_ok());
            assert_eq!(num, 1);

            let (lo, hi) = (2i32, 4i32);
            assert!(tessera_subarray_add_range(
                ctx,
                sub,
                0,
                std::ptr::addr_of!(lo).cast(),
                std::ptr::addr_of!(hi).cast(),
                std::ptr::null()
            )
            .is_ok());
            assert_eq!(
                tessera_subarray_add_range(
                    ctx,
                    sub,
                    0,
                    std::ptr::addr_of!(lo).cast(),
                    std::ptr::addr_of!(hi).cast(),
                    std::ptr::addr_of!(lo).cast()
                ),
                TesseraResult::NotSupported
            );

            let (mut start, mut end, mut stride) =
                (std::ptr::null(), std::ptr::null(), std::ptr::null());
            assert!(tessera_subarray_get_range_from_name(
                ctx,
                sub,
                c("d").as_ptr(),
                0,
                &mut start,
                &mut end,
                &mut stride
            )
            .is_ok());
            assert_eq!((*start.cast::<i32>(), *end.cast::<i32>()), (2, 4));
            assert!(stride.is_null());

            let (mut start_size, mut end_size) = (0, 0);
            assert_eq!(
                tessera_subarray_get_range_var_size(ctx, sub, 0, 0, &mut start_size, &mut end_size),
                TesseraResult::InvalidArgument
            );
            assert_eq!(
                tessera_subarray_get_range(ctx, sub, 0, 3, &mut start, &mut end, &mut stride),
                TesseraResult::NotFound
            );

            tessera_subarray_free(&mut sub);
            assert!(sub.is_null());
            tessera_array_free(&mut array);
            tessera_ctx_free(&mut ctx);
        }
    }
}
