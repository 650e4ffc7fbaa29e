//! Array functions: lifecycle, non-empty domain and metadata.

use std::ffi::{c_char, c_void, CString};

use parking_lot::Mutex;
use tessera_engine::{create_array, Array, EngineError, MetadataValue, QueryType};

use crate::buffer::{bytes_arg, copy_out, str_arg, write_out};
use crate::context::{datatype_arg, enum_arg};
use crate::error::{guard, FfiError, FfiResult, TesseraResult};
use crate::schema::SchemaObject;
use crate::types::{Opaque, TesseraArray, TesseraArraySchema, TesseraCtx};

/// The object behind an array handle.
#[derive(Debug)]
pub struct ArrayObject {
    array: Mutex<Array>,
    uri: CString,
}

impl ArrayObject {
    /// Locks the engine array.
    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, Array> {
        self.array.lock()
    }
}

#[derive(Debug, Clone, Copy)]
enum DimRef<'a> {
    Index(u32),
    Name(&'a str),
}

/// Resolves a dimension and fetches its populated bounds, checking that the
/// dimension is var-sized exactly when `var` is set.
fn non_empty(array: &Array, dim: DimRef<'_>, var: bool) -> FfiResult<Option<(Vec<u8>, Vec<u8>)>> {
    let schema = array.schema()?;
    let domain = schema.domain()?;
    let (index, dimension) = match dim {
        DimRef::Index(i) => (i as usize, domain.dimension(i as usize)?),
        DimRef::Name(name) => domain
            .dimension_by_name(name)
            .ok_or_else(|| EngineError::field_not_found(name))?,
    };
    if dimension.is_var() != var {
        return Err(FfiError::invalid_argument(format!(
            "dimension '{}' is {}; use the {} non-empty domain call",
            dimension.name(),
            if var { "fixed-sized" } else { "var-sized" },
            if var { "fixed" } else { "var" },
        )));
    }
    Ok(array.non_empty_domain(index)?)
}

unsafe fn write_fixed_bounds(
    bounds: Option<(Vec<u8>, Vec<u8>)>,
    domain_out: *mut c_void,
    is_empty_out: *mut i32,
) -> FfiResult<()> {
    if let Some((lo, hi)) = &bounds {
        copy_out(domain_out, "domain_out", &[lo.as_slice(), hi.as_slice()].concat())?;
    }
    write_out(is_empty_out, "is_empty_out", i32::from(bounds.is_none()))
}

unsafe fn write_var_sizes(
    bounds: Option<(Vec<u8>, Vec<u8>)>,
    start_size_out: *mut u64,
    end_size_out: *mut u64,
    is_empty_out: *mut i32,
) -> FfiResult<()> {
    let (start, end) = bounds
        .as_ref()
        .map_or((0, 0), |(lo, hi)| (lo.len() as u64, hi.len() as u64));
    write_out(start_size_out, "start_size_out", start)?;
    write_out(end_size_out, "end_size_out", end)?;
    write_out(is_empty_out, "is_empty_out", i32::from(bounds.is_none()))
}

unsafe fn write_var_bounds(
    bounds: Option<(Vec<u8>, Vec<u8>)>,
    start_out: *mut c_void,
    end_out: *mut c_void,
    is_empty_out: *mut i32,
) -> FfiResult<()> {
    if let Some((lo, hi)) = &bounds {
        copy_out(start_out, "start_out", lo)?;
        copy_out(end_out, "end_out", hi)?;
    }
    write_out(is_empty_out, "is_empty_out", i32::from(bounds.is_none()))
}

// === Lifecycle ===

/// Creates an array at `uri` from a schema.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `uri` must be a valid NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn tessera_array_create(
    ctx: *mut TesseraCtx,
    uri: *const c_char,
    schema: *mut TesseraArraySchema,
) -> TesseraResult {
    guard(ctx, "tessera_array_create", |_| {
        let uri = str_arg(uri, "uri")?;
        let schema = TesseraArraySchema::get_ref(schema)?.schema().clone();
        create_array(uri, schema)?;
        Ok(())
    })
}

/// Allocates a closed array handle for `uri`.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `uri` must be a valid NUL-terminated string
/// - `array_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_alloc(
    ctx: *mut TesseraCtx,
    uri: *const c_char,
    array_out: *mut *mut TesseraArray,
) -> TesseraResult {
    guard(ctx, "tessera_array_alloc", |_| {
        let uri_str = str_arg(uri, "uri")?;
        let object = ArrayObject {
            array: Mutex::new(Array::new(uri_str)),
            uri: CString::from(std::ffi::CStr::from_ptr(uri)),
        };
        write_out(array_out, "array_out", TesseraArray::wrap(object))
    })
}

/// Frees an array handle, closing the array first if open.
///
/// # Safety
///
/// `array` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_free(array: *mut *mut TesseraArray) {
    TesseraArray::release(array);
}

/// Opens the array for reading or writing.
///
/// # Safety
///
/// `ctx` and `array` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_open(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    query_type: u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_open", |_| {
        let query_type = enum_arg(query_type, "query type", QueryType::from_u32)?;
        TesseraArray::get_ref(array)?.lock().open(query_type)?;
        Ok(())
    })
}

/// Opens the array at a timestamp in milliseconds. Reads see fragments
/// written at or before it; writes stamp their fragments with it.
///
/// # Safety
///
/// `ctx` and `array` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_open_at(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    query_type: u32,
    timestamp: u64,
) -> TesseraResult {
    guard(ctx, "tessera_array_open_at", |_| {
        let query_type = enum_arg(query_type, "query type", QueryType::from_u32)?;
        TesseraArray::get_ref(array)?
            .lock()
            .open_at(query_type, timestamp)?;
        Ok(())
    })
}

/// Refreshes the fragments visible to an array open for reading.
///
/// # Safety
///
/// `ctx` and `array` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_reopen(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
) -> TesseraResult {
    guard(ctx, "tessera_array_reopen", |_| {
        TesseraArray::get_ref(array)?.lock().reopen()?;
        Ok(())
    })
}

/// Closes the array, committing staged metadata. Closing a closed array
/// succeeds.
///
/// # Safety
///
/// `ctx` and `array` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_close(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
) -> TesseraResult {
    guard(ctx, "tessera_array_close", |_| {
        TesseraArray::get_ref(array)?.lock().close();
        Ok(())
    })
}

/// Reports whether the array is open.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `is_open_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_is_open(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    is_open_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_is_open", |_| {
        let open = TesseraArray::get_ref(array)?.lock().is_open();
        write_out(is_open_out, "is_open_out", i32::from(open))
    })
}

/// Returns the mode the array was opened in.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `query_type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_query_type(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    query_type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_query_type", |_| {
        let query_type = TesseraArray::get_ref(array)?.lock().query_type()?;
        write_out(query_type_out, "query_type_out", query_type.as_u32())
    })
}

/// Returns a new handle to a copy of the open array's schema.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `schema_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_schema(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    schema_out: *mut *mut TesseraArraySchema,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_schema", |_| {
        let schema = TesseraArray::get_ref(array)?.lock().schema()?;
        write_out(
            schema_out,
            "schema_out",
            TesseraArraySchema::wrap(SchemaObject::new((*schema).clone())),
        )
    })
}

/// Returns the array URI.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `uri_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_uri(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    uri_out: *mut *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_uri", |_| {
        let array = TesseraArray::get_ref(array)?;
        write_out(uri_out, "uri_out", array.uri.as_ptr())
    })
}

// === Non-empty domain ===

/// Writes the populated `[lo, hi]` of a fixed-sized dimension.
///
/// # Arguments
///
/// * `index` - Dimension index
/// * `domain_out` - Receives two values of the dimension's datatype; left
///   untouched when empty
/// * `is_empty_out` - Receives 1 if nothing was written, else 0
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `domain_out` must be writable for two values of the datatype
/// - `is_empty_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_from_index(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    index: u32,
    domain_out: *mut c_void,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_from_index", |_| {
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Index(index), false)?;
        write_fixed_bounds(bounds, domain_out, is_empty_out)
    })
}

/// Same as `tessera_array_get_non_empty_domain_from_index`, by name.
///
/// # Safety
///
/// As for the index variant; `name` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_from_name(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    name: *const c_char,
    domain_out: *mut c_void,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_from_name", |_| {
        let name = str_arg(name, "name")?;
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Name(name), false)?;
        write_fixed_bounds(bounds, domain_out, is_empty_out)
    })
}

/// Returns the byte sizes of the populated bounds of a var-sized dimension.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - the three out-pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_var_size_from_index(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    index: u32,
    start_size_out: *mut u64,
    end_size_out: *mut u64,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_var_size_from_index", |_| {
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Index(index), true)?;
        write_var_sizes(bounds, start_size_out, end_size_out, is_empty_out)
    })
}

/// Same as `tessera_array_get_non_empty_domain_var_size_from_index`, by
/// name.
///
/// # Safety
///
/// As for the index variant; `name` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_var_size_from_name(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    name: *const c_char,
    start_size_out: *mut u64,
    end_size_out: *mut u64,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_var_size_from_name", |_| {
        let name = str_arg(name, "name")?;
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Name(name), true)?;
        write_var_sizes(bounds, start_size_out, end_size_out, is_empty_out)
    })
}

/// Copies the populated bounds of a var-sized dimension into caller
/// buffers sized by the `var_size` call.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `start_out` and `end_out` must be writable for the reported sizes
/// - `is_empty_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_var_from_index(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    index: u32,
    start_out: *mut c_void,
    end_out: *mut c_void,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_var_from_index", |_| {
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Index(index), true)?;
        write_var_bounds(bounds, start_out, end_out, is_empty_out)
    })
}

/// Same as `tessera_array_get_non_empty_domain_var_from_index`, by name.
///
/// # Safety
///
/// As for the index variant; `name` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_non_empty_domain_var_from_name(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    name: *const c_char,
    start_out: *mut c_void,
    end_out: *mut c_void,
    is_empty_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_non_empty_domain_var_from_name", |_| {
        let name = str_arg(name, "name")?;
        let bounds = non_empty(&TesseraArray::get_ref(array)?.lock(), DimRef::Name(name), true)?;
        write_var_bounds(bounds, start_out, end_out, is_empty_out)
    })
}

// === Metadata ===

/// Stages a metadata value on an array open for writing. The value is
/// committed when the array closes.
///
/// # Arguments
///
/// * `key` - Metadata key
/// * `value_type` - Datatype tag of the values
/// * `value_num` - Number of values
/// * `value` - `value_num` values of the datatype
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `key` must be a valid NUL-terminated string
/// - `value` must point to `value_num` values of the datatype
#[no_mangle]
pub unsafe extern "C" fn tessera_array_put_metadata(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    key: *const c_char,
    value_type: u32,
    value_num: u32,
    value: *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_array_put_metadata", |_| {
        let key = str_arg(key, "key")?;
        let datatype = datatype_arg(value_type)?;
        let bytes = bytes_arg(value, u64::from(value_num) * datatype.size(), "value")?;
        TesseraArray::get_ref(array)?.lock().put_metadata(
            key,
            MetadataValue {
                datatype,
                count: value_num,
                bytes: bytes.to_vec(),
            },
        )?;
        Ok(())
    })
}

/// Stages deletion of a metadata key.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `key` must be a valid NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn tessera_array_delete_metadata(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    key: *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_array_delete_metadata", |_| {
        let key = str_arg(key, "key")?;
        TesseraArray::get_ref(array)?.lock().delete_metadata(key)?;
        Ok(())
    })
}

/// Looks up a metadata value on an array open for reading.
///
/// A missing key succeeds with `*value_out` null and `*value_num_out` 0.
/// The value stays valid until the array is reopened, closed or freed.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `key` must be a valid NUL-terminated string
/// - the three out-pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_metadata(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    key: *const c_char,
    value_type_out: *mut u32,
    value_num_out: *mut u32,
    value_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_metadata", |_| {
        let key = str_arg(key, "key")?;
        let array = TesseraArray::get_ref(array)?.lock();
        match array.get_metadata(key)? {
            Some(value) => {
                write_out(value_type_out, "value_type_out", value.datatype.as_u32())?;
                write_out(value_num_out, "value_num_out", value.count)?;
                write_out(value_out, "value_out", value.bytes.as_ptr().cast())
            }
            None => {
                write_out(value_num_out, "value_num_out", 0)?;
                write_out(value_out, "value_out", std::ptr::null())
            }
        }
    })
}

/// Returns the number of metadata entries.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_metadata_num(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    num_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_metadata_num", |_| {
        let num = TesseraArray::get_ref(array)?.lock().metadata_num()?;
        write_out(num_out, "num_out", num)
    })
}

/// Returns the metadata entry at `index` in key order.
///
/// The key is not NUL-terminated; its length goes to `key_len_out`.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - every out-pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_get_metadata_from_index(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    index: u64,
    key_out: *mut *const c_char,
    key_len_out: *mut u32,
    value_type_out: *mut u32,
    value_num_out: *mut u32,
    value_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_array_get_metadata_from_index", |_| {
        let array = TesseraArray::get_ref(array)?.lock();
        let (key, value) = array.metadata_from_index(index)?;
        write_out(key_out, "key_out", key.as_ptr().cast())?;
        write_out(key_len_out, "key_len_out", key.len() as u32)?;
        write_out(value_type_out, "value_type_out", value.datatype.as_u32())?;
        write_out(value_num_out, "value_num_out", value.count)?;
        write_out(value_out, "value_out", value.bytes.as_ptr().cast())
    })
}

/// Reports whether a metadata key exists, and its datatype if so.
///
/// # Safety
///
/// - `ctx` and `array` must be valid handles
/// - `key` must be a valid NUL-terminated string
/// - the out-pointers must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_has_metadata_key(
    ctx: *mut TesseraCtx,
    array: *mut TesseraArray,
    key: *const c_char,
    value_type_out: *mut u32,
    has_key_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_has_metadata_key", |_| {
        let key = str_arg(key, "key")?;
        let array = TesseraArray::get_ref(array)?.lock();
        let value = array.get_metadata(key)?;
        if let Some(value) = value {
            write_out(value_type_out, "value_type_out", value.datatype.as_u32())?;
        }
        write_out(has_key_out, "has_key_out", i32::from(value.is_some()))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::{tessera_ctx_alloc, tessera_ctx_free};
    use crate::schema::*;
    use std::ffi::CStr;
    use tessera_engine::{ArrayType, Datatype};

    pub(crate) fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    pub(crate) unsafe fn new_ctx() -> *mut TesseraCtx {
        let mut ctx = std::ptr::null_mut();
        assert!(tessera_ctx_alloc(std::ptr::null_mut(), &mut ctx).is_ok());
        ctx
    }

    /// Creates an array with one int32 dimension `d` in [1, 10] and an
    /// int32 attribute `a`, returning its URI.
    pub(crate) unsafe fn create_int_array(ctx: *mut TesseraCtx, array_type: ArrayType) -> CString {
        let uri = c(&format!("mem://ffi-test/{}", uuid::Uuid::new_v4()));
        let bounds = [1i32, 10];
        let mut dim = std::ptr::null_mut();
        assert!(tessera_dimension_alloc(
            ctx,
            c("d").as_ptr(),
            Datatype::Int32.as_u32(),
            bounds.as_ptr().cast(),
            std::ptr::null(),
            &mut dim
        )
        .is_ok());
        let mut domain = std::ptr::null_mut();
        assert!(tessera_domain_alloc(ctx, &mut domain).is_ok());
        assert!(tessera_domain_add_dimension(ctx, domain, dim).is_ok());
        let mut attr = std::ptr::null_mut();
        let (name, int32) = (c("a"), Datatype::Int32.as_u32());
        assert!(tessera_attribute_alloc(ctx, name.as_ptr(), int32, &mut attr).is_ok());
        let mut schema = std::ptr::null_mut();
        assert!(tessera_array_schema_alloc(ctx, array_type.as_u32(), &mut schema).is_ok());
        assert!(tessera_array_schema_set_domain(ctx, schema, domain).is_ok());
        assert!(tessera_array_schema_add_attribute(ctx, schema, attr).is_ok());
        assert!(tessera_array_create(ctx, uri.as_ptr(), schema).is_ok());
        tessera_array_schema_free(&mut schema);
        tessera_attribute_free(&mut attr);
        tessera_domain_free(&mut domain);
        tessera_dimension_free(&mut dim);
        uri
    }

    pub(crate) unsafe fn open_array(
        ctx: *mut TesseraCtx,
        uri: &CString,
        mode: QueryType,
    ) -> *mut TesseraArray {
        let mut array = std::ptr::null_mut();
        assert!(tessera_array_alloc(ctx, uri.as_ptr(), &mut array).is_ok());
        assert!(tessera_array_open(ctx, array, mode.as_u32()).is_ok());
        array
    }

    #[test]
    fn lifecycle() {
        unsafe {
            let mut ctx = new_ctx();
            let uri = create_int_array(ctx, ArrayType::Sparse);

            let mut schema = std::ptr::null_mut();
            assert_eq!(
                tessera_array_create(ctx, uri.as_ptr(), schema),
                TesseraResult::NullPointer
            );
            assert!(tessera_array_schema_alloc(ctx, 1, &mut schema).is_ok());
            tessera_array_schema_free(&mut schema);

            let mut array = std::ptr::null_mut();
            assert!(tessera_array_alloc(ctx, uri.as_ptr(), &mut array).is_ok());
            let mut open = 1;
            assert!(tessera_array_is_open(ctx, array, &mut open).is_ok());
            assert_eq!(open, 0);
            assert!(tessera_array_open(ctx, array, QueryType::Read.as_u32()).is_ok());
            assert_eq!(
                tessera_array_open(ctx, array, QueryType::Read.as_u32()),
                TesseraResult::InvalidOperation
            );
            let mut mode = 9;
            assert!(tessera_array_get_query_type(ctx, array, &mut mode).is_ok());
            assert_eq!(mode, QueryType::Read.as_u32());
            let mut uri_out = std::ptr::null();
            assert!(tessera_array_get_uri(ctx, array, &mut uri_out).is_ok());
            assert_eq!(CStr::from_ptr(uri_out), uri.as_c_str());
            assert!(tessera_array_get_schema(ctx, array, &mut schema).is_ok());
            tessera_array_schema_free(&mut schema);
            assert!(tessera_array_reopen(ctx, array).is_ok());
            assert!(tessera_array_close(ctx, array).is_ok());
            assert!(tessera_array_close(ctx, array).is_ok());
            tessera_array_free(&mut array);
            assert!(array.is_null());

            let mut missing = std::ptr::null_mut();
            assert!(tessera_array_alloc(ctx, c("mem://none").as_ptr(), &mut missing).is_ok());
            assert_eq!(
                tessera_array_open(ctx, missing, QueryType::Read.as_u32()),
                TesseraResult::NotFound
            );
            tessera_array_free(&mut missing);
            tessera_ctx_free(&mut ctx);
        }
    }

    #[test]
    fn non_empty_domain_of_fresh_array() {
        unsafe {
            let mut ctx = new_ctx();
            let uri = create_int_array(ctx, ArrayType::Sparse);
            let mut array = open_array(ctx, &uri, QueryType::Read);
            let mut domain = [0i32; 2];
            let mut is_empty = 0;
            assert!(tessera_array_get_non_empty_domain_from_index(
                ctx,
                array,
                0,
                domain.as_mut_ptr().cast(),
                &mut is_empty
            )
            .is_ok());
            assert_eq!(is_empty, 1);

            let (mut start, mut end) = (0, 0);
            assert_eq!(
                tessera_array_get_non_empty_domain_var_size_from_index(
                    ctx, array, 0, &mut start, &mut end, &mut is_empty
                ),
                TesseraResult::InvalidArgument
            );
            assert_eq!(
                tessera_array_get_non_empty_domain_from_name(
                    ctx,
                    array,
                    c("nope").as_ptr(),
                    domain.as_mut_ptr().cast(),
                    &mut is_empty
                ),
                TesseraResult::NotFound
            );
            tessera_array_free(&mut array);
            tessera_ctx_free(&mut ctx);
        }
    }

    #[test]
    fn metadata_round_trip() {
        unsafe {
            let mut ctx = new_ctx();
            let uri = create_int_array(ctx, ArrayType::Dense);
            let mut writer = open_array(ctx, &uri, QueryType::Write);
            let values = [1.5f64, 2.5];
            assert!(tessera_array_put_metadata(
                ctx,
                writer,
                c("scale").as_ptr(),
                Datatype::Float64.as_u32(),
                2,
                values.as_ptr().cast()
            )
            .is_ok());
            assert!(tessera_array_close(ctx, writer).is_ok());
            tessera_array_free(&mut writer);

            let mut reader = open_array(ctx, &uri, QueryType::Read);
            let (mut dt, mut num, mut value) = (0, 0, std::ptr::null());
            let scale = c("scale");
            assert!(tessera_array_get_metadata(
                ctx,
                reader,
                scale.as_ptr(),
                &mut dt,
                &mut num,
                &mut value
            )
            .is_ok());
            assert_eq!((dt, num), (Datatype::Float64.as_u32(), 2));
            assert_eq!(*value.cast::<[f64; 2]>(), values);

            let absent = c("absent");
            assert!(tessera_array_get_metadata(
                ctx,
                reader,
                absent.as_ptr(),
                &mut dt,
                &mut num,
                &mut value
            )
            .is_ok());
            assert!(value.is_null());
            assert_eq!(num, 0);

            let mut count = 0;
            assert!(tessera_array_get_metadata_num(ctx, reader, &mut count).is_ok());
            assert_eq!(count, 1);

            let (mut key, mut key_len) = (std::ptr::null(), 0);
            assert!(tessera_array_get_metadata_from_index(
                ctx, reader, 0, &mut key, &mut key_len, &mut dt, &mut num, &mut value
            )
            .is_ok());
            let key = std::slice::from_raw_parts(key.cast::<u8>(), key_len as usize);
            assert_eq!(key, b"scale");

            let mut has = 0;
            let status =
                tessera_array_has_metadata_key(ctx, reader, scale.as_ptr(), &mut dt, &mut has);
            assert!(status.is_ok());
            assert_eq!(has, 1);
            let mut other_key = std::ptr::null();
            assert_eq!(
                tessera_array_get_metadata_from_index(
                    ctx, reader, 5, &mut other_key, &mut key_len, &mut dt, &mut num, &mut value
                ),
                TesseraResult::NotFound
            );
            tessera_array_free(&mut reader);
            tessera_ctx_free(&mut ctx);
        }
    }
}
