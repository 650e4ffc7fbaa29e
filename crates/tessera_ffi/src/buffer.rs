//! Raw memory crossing the ABI.
//!
//! Conversions from caller pointers to Rust views, and the buffer
//! registrations a query keeps between `set_*_buffer` and `submit`.

use std::ffi::{c_char, c_void, CStr};

use crate::error::{FfiError, FfiResult};

/// Reads a NUL-terminated UTF-8 string argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char, name: &'static str) -> FfiResult<&'a str> {
    if ptr.is_null() {
        return Err(FfiError::NullPointer { name });
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8 { name })
}

/// Views `len` bytes at `ptr`. A zero length accepts a null pointer.
///
/// # Safety
///
/// `ptr` must be null or valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn bytes_arg<'a>(
    ptr: *const c_void,
    len: u64,
    name: &'static str,
) -> FfiResult<&'a [u8]> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(FfiError::NullPointer { name });
    }
    Ok(std::slice::from_raw_parts(ptr.cast::<u8>(), to_usize(len)?))
}

/// Writes `value` through an out-pointer.
///
/// # Safety
///
/// `out` must be null or valid for writes.
pub(crate) unsafe fn write_out<T>(out: *mut T, name: &'static str, value: T) -> FfiResult<()> {
    if out.is_null() {
        return Err(FfiError::NullPointer { name });
    }
    out.write(value);
    Ok(())
}

/// Copies `bytes` to a caller buffer assumed large enough.
///
/// # Safety
///
/// `dst` must be null or valid for writes of `bytes.len()` bytes.
pub(crate) unsafe fn copy_out(dst: *mut c_void, name: &'static str, bytes: &[u8]) -> FfiResult<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    if dst.is_null() {
        return Err(FfiError::NullPointer { name });
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.cast::<u8>(), bytes.len());
    Ok(())
}

fn to_usize(len: u64) -> FfiResult<usize> {
    usize::try_from(len).map_err(|_| FfiError::invalid_argument(format!("size {len} overflows")))
}

/// One caller buffer: its address and the cell holding its size in bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawBuffer<T> {
    ptr: *mut T,
    size: *mut u64,
}

impl<T> RawBuffer<T> {
    /// Registers a buffer. The size cell must be non-null.
    pub(crate) fn new(ptr: *mut T, size: *mut u64, name: &'static str) -> FfiResult<Self> {
        if size.is_null() {
            return Err(FfiError::NullPointer { name });
        }
        if ptr.is_aligned() {
            Ok(Self { ptr, size })
        } else {
            Err(FfiError::invalid_argument(format!(
                "{name} is not aligned to {} bytes",
                std::mem::align_of::<T>()
            )))
        }
    }

    /// Returns the registered address.
    pub(crate) fn ptr(&self) -> *mut T {
        self.ptr
    }

    /// Returns the registered size cell.
    pub(crate) fn size_cell(&self) -> *mut u64 {
        self.size
    }

    /// Reads the size cell, in bytes.
    ///
    /// # Safety
    ///
    /// The size cell must still be valid.
    pub(crate) unsafe fn size(&self) -> u64 {
        *self.size
    }

    /// Stores a size, in bytes.
    ///
    /// # Safety
    ///
    /// The size cell must still be valid.
    pub(crate) unsafe fn set_size(&self, bytes: u64) {
        *self.size = bytes;
    }

    fn elements(&self, name: &str) -> FfiResult<usize> {
        // SAFETY: the caller of `view`/`view_mut` guarantees the cell.
        let bytes = unsafe { self.size() };
        let width = std::mem::size_of::<T>() as u64;
        if bytes % width != 0 {
            return Err(FfiError::invalid_argument(format!(
                "{name}: buffer size {bytes} is not a multiple of {width}"
            )));
        }
        if bytes > 0 && self.ptr.is_null() {
            return Err(FfiError::invalid_argument(format!(
                "{name}: null buffer with size {bytes}"
            )));
        }
        to_usize(bytes / width)
    }

    /// Views the buffer for reading, sized by its size cell.
    ///
    /// # Safety
    ///
    /// Both registered pointers must still be valid, and the buffer must
    /// not be written for `'a`.
    pub(crate) unsafe fn view<'a>(&self, name: &str) -> FfiResult<&'a [T]> {
        let len = self.elements(name)?;
        if len == 0 {
            return Ok(&[]);
        }
        Ok(std::slice::from_raw_parts(self.ptr, len))
    }

    /// Views the buffer for writing, sized by its size cell.
    ///
    /// # Safety
    ///
    /// Both registered pointers must still be valid, and the buffer must not
    /// be aliased for `'a`.
    pub(crate) unsafe fn view_mut<'a>(&self, name: &str) -> FfiResult<&'a mut [T]> {
        let len = self.elements(name)?;
        if len == 0 {
            return Ok(&mut []);
        }
        Ok(std::slice::from_raw_parts_mut(self.ptr, len))
    }
}

/// The buffers registered for one field of a query.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FieldBuffers {
    /// Values.
    pub(crate) data: Option<RawBuffer<u8>>,
    /// Byte offsets of var-sized cells.
    pub(crate) offsets: Option<RawBuffer<u64>>,
    /// Validity bytes.
    pub(crate) validity: Option<RawBuffer<u8>>,
}
