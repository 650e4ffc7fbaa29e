//! Memory handed to the engine.
//!
//! A [`BoundBuffer`] is caller memory the engine holds the address of. It
//! owns the memory and the size cell the engine reads and updates, so both
//! stay put for as long as the binding is alive. A [`NativeBuffer`] is a
//! view of memory the engine reports; [`NativeBuffer::read_back`] copies
//! it out.

use std::ffi::c_void;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::datatype::TypedBuffer;
use crate::error::{Error, Result};

/// A heap slot holding a byte count the engine reads and writes.
///
/// The slot is addressed only through its raw pointer, so writes made by
/// the engine through that pointer are never invalidated by a Rust borrow.
#[derive(Debug)]
pub(crate) struct SizeCell(NonNull<u64>);

// SAFETY: the cell is plain heap memory; access is serialized by the owner.
unsafe impl Send for SizeCell {}
// SAFETY: shared access only reads the slot.
unsafe impl Sync for SizeCell {}

impl SizeCell {
    pub(crate) fn new(bytes: u64) -> Self {
        Self(NonNull::from(Box::leak(Box::new(bytes))))
    }

    pub(crate) fn get(&self) -> u64 {
        // SAFETY: the slot lives until drop.
        unsafe { self.0.as_ptr().read() }
    }

    pub(crate) fn set(&self, bytes: u64) {
        // SAFETY: the slot lives until drop.
        unsafe { self.0.as_ptr().write(bytes) }
    }

    pub(crate) fn as_ptr(&self) -> *mut u64 {
        self.0.as_ptr()
    }
}

impl Drop for SizeCell {
    fn drop(&mut self) {
        // SAFETY: allocated by `Box` in `new` and freed only here.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

#[derive(Debug)]
enum Memory {
    /// Caller memory moved into the binding.
    Owned(TypedBuffer),
    /// Caller memory the binding only points at.
    Borrowed { ptr: *mut c_void, bytes: u64 },
}

/// Caller memory bound to an engine buffer slot.
#[derive(Debug)]
pub struct BoundBuffer {
    memory: Memory,
    size: SizeCell,
}

// SAFETY: owned memory is a `Vec`; borrowed memory is only reachable
// through `unsafe` constructors whose callers vouch for it.
unsafe impl Send for BoundBuffer {}
// SAFETY: shared access never writes through the pointers.
unsafe impl Sync for BoundBuffer {}

impl BoundBuffer {
    /// Binds a buffer. The size cell starts at the buffer's byte length.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyBuffer`] if `buffer` has no elements.
    pub fn bind(name: &str, slot: &'static str, buffer: TypedBuffer) -> Result<Self> {
        if buffer.is_empty() {
            return Err(Error::EmptyBuffer {
                name: name.to_string(),
                slot,
            });
        }
        let size = SizeCell::new(buffer.byte_len());
        Ok(Self {
            memory: Memory::Owned(buffer),
            size,
        })
    }

    /// Binds memory the caller keeps ownership of.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `bytes` bytes until the
    /// binding is dropped or replaced, and must not be accessed elsewhere
    /// while the engine may use it.
    pub unsafe fn bind_raw(
        name: &str,
        slot: &'static str,
        ptr: *mut c_void,
        bytes: u64,
    ) -> Result<Self> {
        if bytes == 0 {
            return Err(Error::EmptyBuffer {
                name: name.to_string(),
                slot,
            });
        }
        Ok(Self {
            memory: Memory::Borrowed { ptr, bytes },
            size: SizeCell::new(bytes),
        })
    }

    /// Returns the address handed to the engine.
    pub(crate) fn ptr(&mut self) -> *mut c_void {
        match &mut self.memory {
            Memory::Owned(buffer) => buffer.as_mut_ptr(),
            Memory::Borrowed { ptr, .. } => *ptr,
        }
    }

    /// Returns the size cell handed to the engine.
    pub(crate) fn size_ptr(&self) -> *mut u64 {
        self.size.as_ptr()
    }

    /// Returns the capacity in bytes.
    pub fn capacity(&self) -> u64 {
        match &self.memory {
            Memory::Owned(buffer) => buffer.byte_len(),
            Memory::Borrowed { bytes, .. } => *bytes,
        }
    }

    /// Returns the byte count last written to the size cell.
    pub fn populated(&self) -> u64 {
        self.size.get()
    }

    /// Restores the size cell to the full capacity.
    pub(crate) fn reset(&self) {
        self.size.set(self.capacity());
    }

    /// Returns the owned buffer, or `None` for borrowed memory.
    pub fn buffer(&self) -> Option<&TypedBuffer> {
        match &self.memory {
            Memory::Owned(buffer) => Some(buffer),
            Memory::Borrowed { .. } => None,
        }
    }

    pub(crate) fn buffer_mut(&mut self) -> Option<&mut TypedBuffer> {
        match &mut self.memory {
            Memory::Owned(buffer) => Some(buffer),
            Memory::Borrowed { .. } => None,
        }
    }

    /// Releases the binding, returning owned memory to the caller.
    pub fn into_buffer(self) -> Option<TypedBuffer> {
        match self.memory {
            Memory::Owned(buffer) => Some(buffer),
            Memory::Borrowed { .. } => None,
        }
    }
}

/// Engine-reported memory, valid while `'a` is borrowed.
#[derive(Debug)]
pub struct NativeBuffer<'a> {
    ptr: *const u8,
    len: u64,
    _owner: PhantomData<&'a ()>,
}

impl<'a> NativeBuffer<'a> {
    /// Wraps a pointer and length reported by the engine.
    ///
    /// # Safety
    ///
    /// Unless null, `ptr` must be valid for reads of `len` bytes for `'a`.
    pub(crate) unsafe fn new(ptr: *const c_void, len: u64) -> Self {
        Self {
            ptr: ptr.cast(),
            len,
            _owner: PhantomData,
        }
    }

    /// Returns the reported length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if the reported length is zero.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the memory into a new vector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataUnavailable`] if the engine reports a length
    /// but no memory.
    pub fn read_back(&self, name: &str) -> Result<Vec<u8>> {
        if self.len == 0 {
            return Ok(Vec::new());
        }
        if self.ptr.is_null() {
            return Err(Error::DataUnavailable {
                name: name.to_string(),
                expected: self.len,
            });
        }
        let len = usize::try_from(self.len).map_err(|_| {
            Error::invalid_argument(format!("'{name}': length {} overflows", self.len))
        })?;
        // SAFETY: guaranteed by the constructor's contract.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr, len) }.to_vec())
    }
}

/// Copies `len` bytes the engine returned, treating a zero length as empty
/// whatever the pointer.
///
/// # Safety
///
/// Unless `len` is zero, `ptr` must be valid for reads of `len` bytes.
pub(crate) unsafe fn copy_native(ptr: *const c_void, len: u64, name: &str) -> Result<Vec<u8>> {
    NativeBuffer::new(ptr, len).read_back(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffers_are_rejected() {
        let err = BoundBuffer::bind("a", "data", TypedBuffer::Int32(Vec::new())).unwrap_err();
        assert!(matches!(err, Error::EmptyBuffer { slot: "data", .. }));
        let err =
            unsafe { BoundBuffer::bind_raw("a", "data", std::ptr::null_mut(), 0) }.unwrap_err();
        assert!(matches!(err, Error::EmptyBuffer { .. }));
    }

    #[test]
    fn size_cell_tracks_engine_writes() {
        let mut bound = BoundBuffer::bind("a", "data", TypedBuffer::Int64(vec![0; 4])).unwrap();
        assert_eq!(bound.capacity(), 32);
        assert_eq!(bound.populated(), 32);

        // Stand in for the engine writing through the registered pointers.
        let (ptr, size) = (bound.ptr(), bound.size_ptr());
        unsafe {
            ptr.cast::<i64>().write(7);
            size.write(8);
        }
        assert_eq!(bound.populated(), 8);
        assert_eq!(bound.buffer(), Some(&TypedBuffer::Int64(vec![7, 0, 0, 0])));
        bound.reset();
        assert_eq!(bound.populated(), 32);
        assert_eq!(bound.into_buffer().unwrap().len(), 4);
    }

    #[test]
    fn read_back_copies() {
        let data = [1u8, 2, 3];
        let view = unsafe { NativeBuffer::new(data.as_ptr().cast(), 3) };
        assert_eq!(view.read_back("x").unwrap(), vec![1, 2, 3]);

        let missing = unsafe { NativeBuffer::new(std::ptr::null(), 12) };
        let err = missing.read_back("x").unwrap_err();
        assert!(matches!(err, Error::DataUnavailable { expected: 12, .. }));
        assert_eq!(
            err.to_string(),
            "'x': expected length 12 available, data unavailable"
        );
        assert!(unsafe { copy_native(std::ptr::null(), 0, "x") }.unwrap().is_empty());
    }
}
