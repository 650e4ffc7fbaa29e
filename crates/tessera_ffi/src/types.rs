//! Opaque handle types for FFI.
//!
//! Each handle is a pointer to a boxed internal object. Handles are never
//! dereferenced by callers; they are created by an `*_alloc` function and
//! released by the matching `*_free`, which takes the address of the handle
//! and nulls it.

use crate::array::ArrayObject;
use crate::condition::ConditionObject;
use crate::context::{ConfigObject, ContextObject};
use crate::error::{ErrorObject, FfiError, FfiResult};
use crate::query::QueryObject;
use crate::schema::{AttributeObject, DimensionObject, DomainObject, SchemaObject};
use crate::subarray::SubarrayObject;

/// Maps an opaque handle type to the object it points to.
///
/// # Safety
///
/// Implementors must only be created through [`Opaque::wrap`], so that every
/// non-null handle points to a live `Box<Self::Object>`.
pub(crate) unsafe trait Opaque: Sized {
    /// The boxed object behind the handle.
    type Object;

    /// Argument name used in null-pointer errors.
    const NAME: &'static str;

    /// Boxes `object` and returns its handle.
    fn wrap(object: Self::Object) -> *mut Self {
        Box::into_raw(Box::new(object)).cast()
    }

    /// Borrows the object behind a handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live handle of this type.
    unsafe fn get_ref<'a>(ptr: *const Self) -> FfiResult<&'a Self::Object> {
        ptr.cast::<Self::Object>()
            .as_ref()
            .ok_or(FfiError::NullPointer { name: Self::NAME })
    }

    /// Mutably borrows the object behind a handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live handle of this type, not borrowed
    /// elsewhere for the duration of `'a`.
    unsafe fn get_mut<'a>(ptr: *mut Self) -> FfiResult<&'a mut Self::Object> {
        ptr.cast::<Self::Object>()
            .as_mut()
            .ok_or(FfiError::NullPointer { name: Self::NAME })
    }

    /// Drops the object behind `*slot` and nulls the handle. Null slots and
    /// null handles are ignored.
    ///
    /// # Safety
    ///
    /// `slot` must be null or point to a null or live handle of this type.
    unsafe fn release(slot: *mut *mut Self) {
        if slot.is_null() || (*slot).is_null() {
            return;
        }
        drop(Box::from_raw((*slot).cast::<Self::Object>()));
        *slot = std::ptr::null_mut();
    }
}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $handle:ident => $object:ty, $name:literal) => {
        $(#[$meta])*
        #[repr(C)]
        pub struct $handle {
            _private: [u8; 0],
        }

        // SAFETY: handles of this type are only produced by `wrap`.
        unsafe impl Opaque for $handle {
            type Object = $object;
            const NAME: &'static str = $name;
        }
    };
}

opaque_handle! {
    /// An opaque context handle.
    ///
    /// Contexts carry configuration, tags, the last error and the
    /// cancellation token shared by every query issued through them.
    TesseraCtx => ContextObject, "ctx"
}

opaque_handle! {
    /// An opaque error handle.
    TesseraError => ErrorObject, "error"
}

opaque_handle! {
    /// An opaque configuration handle.
    TesseraConfig => ConfigObject, "config"
}

opaque_handle! {
    /// An opaque dimension handle.
    TesseraDimension => DimensionObject, "dimension"
}

opaque_handle! {
    /// An opaque domain handle.
    TesseraDomain => DomainObject, "domain"
}

opaque_handle! {
    /// An opaque attribute handle.
    TesseraAttribute => AttributeObject, "attribute"
}

opaque_handle! {
    /// An opaque array schema handle.
    TesseraArraySchema => SchemaObject, "array_schema"
}

opaque_handle! {
    /// An opaque array handle.
    TesseraArray => ArrayObject, "array"
}

opaque_handle! {
    /// An opaque subarray handle.
    TesseraSubarray => SubarrayObject, "subarray"
}

opaque_handle! {
    /// An opaque query condition handle.
    TesseraQueryCondition => ConditionObject, "query_condition"
}

opaque_handle! {
    /// An opaque query handle.
    TesseraQuery => QueryObject, "query"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_and_release() {
        let mut handle = TesseraError::wrap(ErrorObject::new("gone"));
        assert!(!handle.is_null());
        unsafe {
            let object = TesseraError::get_ref(handle).unwrap();
            assert_eq!(object.message().to_str().unwrap(), "gone");
            TesseraError::release(&mut handle);
            assert!(handle.is_null());
            TesseraError::release(&mut handle);
            TesseraError::release(std::ptr::null_mut());
        }
    }

    #[test]
    fn null_handles_are_errors() {
        let err = unsafe { TesseraQuery::get_ref(std::ptr::null()) }.unwrap_err();
        assert!(matches!(err, FfiError::NullPointer { name: "query" }));
    }
}
