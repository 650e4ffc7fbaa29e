//! Query condition functions.

use std::ffi::{c_char, c_void};

use tessera_engine::{CombinationOp, ConditionOp, QueryCondition};

use crate::buffer::{bytes_arg, str_arg, write_out};
use crate::context::enum_arg;
use crate::error::{guard, TesseraResult};
use crate::types::{Opaque, TesseraCtx, TesseraQueryCondition};

/// The object behind a query condition handle.
#[derive(Debug)]
pub struct ConditionObject {
    condition: QueryCondition,
}

impl ConditionObject {
    pub(crate) fn condition(&self) -> &QueryCondition {
        &self.condition
    }
}

/// Allocates a comparison of a field against a value.
///
/// # Arguments
///
/// * `field` - Attribute or dimension name
/// * `value` - The value, or null to compare against null
/// * `value_size` - Size of `value` in bytes
/// * `op` - Comparison tag
/// * `cond_out` - Output pointer for the condition handle
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `field` must be a valid NUL-terminated string
/// - `value` must be null or point to `value_size` readable bytes
/// - `cond_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_alloc(
    ctx: *mut TesseraCtx,
    field: *const c_char,
    value: *const c_void,
    value_size: u64,
    op: u32,
    cond_out: *mut *mut TesseraQueryCondition,
) -> TesseraResult {
    guard(ctx, "tessera_query_condition_alloc", |_| {
        let field = str_arg(field, "field")?;
        let op = enum_arg(op, "condition op", ConditionOp::from_u32)?;
        let value = if value.is_null() {
            None
        } else {
            Some(bytes_arg(value, value_size, "value")?)
        };
        let condition = QueryCondition::compare(field, op, value)?;
        write_out(
            cond_out,
            "cond_out",
            TesseraQueryCondition::wrap(ConditionObject { condition }),
        )
    })
}

/// Combines two conditions with AND or OR into a new handle.
///
/// # Safety
///
/// - `ctx`, `left` and `right` must be valid handles
/// - `cond_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_combine(
    ctx: *mut TesseraCtx,
    left: *mut TesseraQueryCondition,
    right: *mut TesseraQueryCondition,
    op: u32,
    cond_out: *mut *mut TesseraQueryCondition,
) -> TesseraResult {
    guard(ctx, "tessera_query_condition_combine", |_| {
        let op = enum_arg(op, "combination op", CombinationOp::from_u32)?;
        let left = TesseraQueryCondition::get_ref(left)?;
        let right = TesseraQueryCondition::get_ref(right)?;
        let condition = left.condition.combine(&right.condition, op)?;
        write_out(
            cond_out,
            "cond_out",
            TesseraQueryCondition::wrap(ConditionObject { condition }),
        )
    })
}

/// Negates a condition into a new handle.
///
/// # Safety
///
/// - `ctx` and `cond` must be valid handles
/// - `cond_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_negate(
    ctx: *mut TesseraCtx,
    cond: *mut TesseraQueryCondition,
    cond_out: *mut *mut TesseraQueryCondition,
) -> TesseraResult {
    guard(ctx, "tessera_query_condition_negate", |_| {
        let condition = TesseraQueryCondition::get_ref(cond)?.condition.negate();
        write_out(
            cond_out,
            "cond_out",
            TesseraQueryCondition::wrap(ConditionObject { condition }),
        )
    })
}

/// Frees a condition and nulls the handle.
///
/// # Safety
///
/// `cond` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_query_condition_free(cond: *mut *mut TesseraQueryCondition) {
    TesseraQueryCondition::release(cond);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::tests::{c, new_ctx};
    use crate::context::tessera_ctx_free;

    #[test]
    fn conditions_combine_and_negate() {
        unsafe {
            let mut ctx = new_ctx();
            let value = 3i32;
            let (mut low, mut high) = (std::ptr::null_mut(), std::ptr::null_mut());
            assert!(tessera_query_condition_alloc(
                ctx,
                c("a").as_ptr(),
                std::ptr::addr_of!(value).cast(),
                4,
                ConditionOp::Lt.as_u32(),
                &mut low,
            )
            .is_ok());
            assert!(tessera_query_condition_alloc(
                ctx,
                c("b").as_ptr(),
                std::ptr::null(),
                0,
                ConditionOp::Eq.as_u32(),
                &mut high,
            )
            .is_ok());

            let mut both = std::ptr::null_mut();
            assert!(tessera_query_condition_combine(
                ctx,
                low,
                high,
                CombinationOp::Or.as_u32(),
                &mut both
            )
            .is_ok());
            let mut none = std::ptr::null_mut();
            assert!(tessera_query_condition_negate(ctx, both, &mut none).is_ok());
            let negated = TesseraQueryCondition::get_ref(none).unwrap().condition();
            assert!(matches!(
                negated,
                QueryCondition::Combine { op: CombinationOp::Not, operands } if operands.len() == 1
            ));

            let mut bad = std::ptr::null_mut();
            assert_eq!(
                tessera_query_condition_combine(
                    ctx,
                    low,
                    high,
                    CombinationOp::Not.as_u32(),
                    &mut bad
                ),
                TesseraResult::InvalidArgument
            );
            assert_eq!(
                tessera_query_condition_alloc(
                    ctx,
                    c("b").as_ptr(),
                    std::ptr::null(),
                    0,
                    ConditionOp::Gt.as_u32(),
                    &mut bad,
                ),
                TesseraResult::InvalidArgument
            );
            assert!(bad.is_null());

            for cond in [&mut low, &mut high, &mut both, &mut none] {
                tessera_query_condition_free(cond);
            }
            tessera_ctx_free(&mut ctx);
        }
    }
}
