//! Reference-counted ownership of native handles.
//!
//! A [`NativeHandle`] owns one pointer returned by an `*_alloc` call and the
//! matching `*_free` function. Clones share the pointer and the obligation
//! to release it. The pointer is released exactly once: by the first
//! explicit [`NativeHandle::free`] on any clone, or when the last clone is
//! dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};

/// A native `*_free` function. It takes the slot holding the pointer and
/// nulls it.
pub type ReleaseFn<T> = unsafe extern "C" fn(*mut *mut T);

struct Inner<T> {
    ptr: AtomicPtr<T>,
    /// Shared for calls that only read the native object, exclusive for
    /// calls that mutate it and for the release.
    gate: RwLock<()>,
    release: ReleaseFn<T>,
    what: &'static str,
}

impl<T> Inner<T> {
    fn free(&self) -> bool {
        let _gate = self.gate.write();
        let ptr = self.ptr.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return false;
        }
        let mut slot = ptr;
        // SAFETY: `ptr` came from the allocation `release` pairs with, the
        // swap above hands it to exactly one caller, and the exclusive gate
        // waits out every call still using it.
        unsafe { (self.release)(&mut slot) };
        tracing::trace!(what = self.what, "released native handle");
        true
    }

    fn load(&self) -> Result<*mut T> {
        let ptr = self.ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            Err(Error::HandleFreed { what: self.what })
        } else {
            Ok(ptr)
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.free();
    }
}

enum Gate<'a> {
    Shared(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Exclusive(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

/// A pointer pinned for native calls.
///
/// The native object cannot be released, nor mutated by another thread,
/// while the guard lives. Dereferences to the raw pointer.
pub struct HandleGuard<'a, T> {
    ptr: *mut T,
    _gate: Gate<'a>,
}

impl<T> Deref for HandleGuard<'_, T> {
    type Target = *mut T;

    fn deref(&self) -> &*mut T {
        &self.ptr
    }
}

impl<T> fmt::Debug for HandleGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self._gate {
            Gate::Shared(_) => "shared",
            Gate::Exclusive(_) => "exclusive",
        };
        f.debug_struct("HandleGuard")
            .field("ptr", &self.ptr)
            .field("mode", &mode)
            .finish()
    }
}

/// Shared owner of one native pointer.
pub struct NativeHandle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> NativeHandle<T> {
    /// Takes ownership of `ptr`, released later with `release`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if `ptr` is null.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation that `release` frees, and nothing
    /// else may free it.
    pub unsafe fn acquire(
        ptr: *mut T,
        release: ReleaseFn<T>,
        what: &'static str,
    ) -> Result<Self> {
        if ptr.is_null() {
            return Err(Error::Allocation { what });
        }
        Ok(Self {
            inner: Arc::new(Inner {
                ptr: AtomicPtr::new(ptr),
                gate: RwLock::new(()),
                release,
                what,
            }),
        })
    }

    /// Pins the pointer for calls that only read the native object.
    ///
    /// Shared guards may be taken again on the same thread while one is
    /// held.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleFreed`] after [`NativeHandle::free`].
    pub fn get(&self) -> Result<HandleGuard<'_, T>> {
        let gate = self.inner.gate.read_recursive();
        Ok(HandleGuard {
            ptr: self.inner.load()?,
            _gate: Gate::Shared(gate),
        })
    }

    /// Pins the pointer for a call that mutates the native object. Waits
    /// for every other guard on the handle to drop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandleFreed`] after [`NativeHandle::free`].
    pub fn get_mut(&self) -> Result<HandleGuard<'_, T>> {
        let gate = self.inner.gate.write();
        Ok(HandleGuard {
            ptr: self.inner.load()?,
            _gate: Gate::Exclusive(gate),
        })
    }

    /// Releases the native object once calls in flight finish. Later calls
    /// on any clone are no-ops.
    ///
    /// Returns true if this call performed the release.
    pub fn free(&self) -> bool {
        self.inner.free()
    }

    /// Returns true once the native object has been released.
    pub fn is_freed(&self) -> bool {
        self.inner.ptr.load(Ordering::Acquire).is_null()
    }

    /// Returns the number of clones sharing this handle.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns the kind of object behind the handle.
    pub fn what(&self) -> &'static str {
        self.inner.what
    }
}

impl<T> Clone for NativeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("what", &self.inner.what)
            .field("ptr", &self.inner.ptr.load(Ordering::Relaxed))
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    struct Resource {
        counter: &'static AtomicUsize,
    }

    unsafe extern "C" fn release_resource(slot: *mut *mut Resource) {
        let resource = Box::from_raw(*slot);
        resource.counter.fetch_add(1, Ordering::SeqCst);
        *slot = std::ptr::null_mut();
    }

    fn resource(counter: &'static AtomicUsize) -> NativeHandle<Resource> {
        let ptr = Box::into_raw(Box::new(Resource { counter }));
        unsafe { NativeHandle::acquire(ptr, release_resource, "resource") }.unwrap()
    }

    #[test]
    fn null_is_an_allocation_failure() {
        let err = unsafe {
            NativeHandle::<Resource>::acquire(std::ptr::null_mut(), release_resource, "resource")
        }
        .unwrap_err();
        assert!(matches!(err, Error::Allocation { what: "resource" }));
    }

    #[test]
    fn free_twice_releases_once() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let handle = resource(&COUNT);
        assert!(handle.get().is_ok());
        assert!(handle.free());
        assert!(!handle.free());
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        assert!(handle.is_freed());
        assert!(matches!(
            handle.get(),
            Err(Error::HandleFreed { what: "resource" })
        ));
        drop(handle);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_the_release() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let handle = resource(&COUNT);
        let clone = handle.clone();
        assert_eq!(handle.ref_count(), 2);
        drop(handle);
        assert_eq!(COUNT.load(Ordering::SeqCst), 0);
        assert!(clone.get().is_ok());
        drop(clone);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);

        let handle = resource(&RELEASED);
        let clone = handle.clone();
        clone.free();
        assert!(handle.get().is_err());
        drop(handle);
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_free_releases_once() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let handle = resource(&COUNT);
        let barrier = Arc::new(Barrier::new(8));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let handle = handle.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    handle.free()
                })
            })
            .collect();
        let released = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&r| r)
            .count();
        assert_eq!(released, 1);
        drop(handle);
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn free_waits_for_calls_in_flight() {
        static COUNT: AtomicUsize = AtomicUsize::new(0);
        let handle = resource(&COUNT);
        let pinned = handle.get().unwrap();
        let again = handle.get().unwrap();
        assert_eq!(*pinned, *again);
        drop(again);

        let freer = {
            let handle = handle.clone();
            thread::spawn(move || handle.free())
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(COUNT.load(Ordering::SeqCst), 0);
        assert!(!handle.is_freed());

        drop(pinned);
        assert!(freer.join().unwrap());
        assert_eq!(COUNT.load(Ordering::SeqCst), 1);
        assert!(handle.get_mut().is_err());
    }
}
