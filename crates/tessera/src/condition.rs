//! Query conditions: filters a read applies to the cells it returns.
//!
//! Sparse reads drop the cells a condition rejects. Dense reads keep the
//! cell grid and return fill values for them.

use tessera_ffi::{
    tessera_query_condition_alloc, tessera_query_condition_combine,
    tessera_query_condition_free, tessera_query_condition_negate, TesseraQueryCondition,
};

use crate::context::{c_string, Context};
use crate::datatype::Element;
use crate::error::Result;
use crate::handle::{HandleGuard, NativeHandle};
use crate::types::{CombinationOp, ConditionOp};

/// A comparison, or a combination of them, on attribute and dimension
/// values.
#[derive(Debug, Clone)]
pub struct QueryCondition {
    ctx: Context,
    handle: NativeHandle<TesseraQueryCondition>,
}

impl QueryCondition {
    /// Compares `field` against one value. The value's width is checked
    /// against the field when the condition is set on a query.
    pub fn new<T: Element>(ctx: &Context, field: &str, value: T, op: ConditionOp) -> Result<Self> {
        let buffer = T::into_buffer(vec![value]);
        Self::alloc(ctx, field, Some(buffer.as_bytes()), op)
    }

    /// Compares a var-sized field against a string.
    pub fn new_string(ctx: &Context, field: &str, value: &str, op: ConditionOp) -> Result<Self> {
        Self::alloc(ctx, field, Some(value.as_bytes()), op)
    }

    /// Tests a nullable field for null: [`ConditionOp::Eq`] keeps null
    /// cells and [`ConditionOp::Ne`] keeps valid ones.
    pub fn null(ctx: &Context, field: &str, op: ConditionOp) -> Result<Self> {
        Self::alloc(ctx, field, None, op)
    }

    fn alloc(ctx: &Context, field: &str, value: Option<&[u8]>, op: ConditionOp) -> Result<Self> {
        let c_field = c_string(field, "condition field")?;
        let (value_ptr, value_size) =
            value.map_or((std::ptr::null(), 0), |v| (v.as_ptr().cast(), v.len() as u64));
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; the value outlives the call; valid out-slot.
        let status = unsafe {
            tessera_query_condition_alloc(
                *ctx.ptr()?,
                c_field.as_ptr(),
                value_ptr,
                value_size,
                op.as_u32(),
                &mut ptr,
            )
        };
        ctx.check(status, "allocate query condition", field)?;
        Self::from_raw(ctx, ptr)
    }

    fn from_raw(ctx: &Context, ptr: *mut TesseraQueryCondition) -> Result<Self> {
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe {
            NativeHandle::acquire(ptr, tessera_query_condition_free, "query condition")
        }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraQueryCondition>> {
        self.handle.get()
    }

    /// Combines `self` and `other` with AND or OR into a new condition.
    pub fn combine(&self, other: &QueryCondition, op: CombinationOp) -> Result<Self> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_query_condition_combine(
                *self.ctx.ptr()?,
                *self.ptr()?,
                *other.ptr()?,
                op.as_u32(),
                &mut ptr,
            )
        };
        self.ctx.check(status, "combine query conditions", op.as_str())?;
        Self::from_raw(&self.ctx, ptr)
    }

    /// Returns a new condition holding where `self` does not.
    pub fn negate(&self) -> Result<Self> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_query_condition_negate(*self.ctx.ptr()?, *self.ptr()?, &mut ptr) };
        self.ctx.check(status, "negate query condition", "")?;
        Self::from_raw(&self.ctx, ptr)
    }

    /// Releases the native condition.
    pub fn free(&self) {
        self.handle.free();
    }
}
