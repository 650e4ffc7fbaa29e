//! Error codes, error objects and the entry-point guard.
//!
//! Every exported function returns a [`TesseraResult`]. Functions taking a
//! context record the failure message in that context; it stays there until
//! the next call on the same context and is fetched with
//! [`tessera_ctx_get_last_error`]. Functions without a context (config
//! objects) hand the error object back through an out-parameter.

use std::ffi::{c_char, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};

use tessera_engine::EngineError;
use thiserror::Error;

use crate::context::ContextObject;
use crate::types::{Opaque, TesseraCtx, TesseraError};

/// Result code for FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesseraResult {
    /// Operation succeeded.
    Ok = 0,
    /// Generic error.
    Error = 1,
    /// Invalid argument.
    InvalidArgument = 2,
    /// Array, field, key or index not found.
    NotFound = 3,
    /// The array already exists.
    AlreadyExists = 4,
    /// Null pointer.
    NullPointer = 5,
    /// Out of memory.
    OutOfMemory = 6,
    /// Feature not supported.
    NotSupported = 7,
    /// Operation not valid in the object's current state.
    InvalidOperation = 8,
    /// Cancelled through the context.
    Cancelled = 9,
}

impl TesseraResult {
    /// Returns true if the result indicates success.
    pub fn is_ok(self) -> bool {
        self == TesseraResult::Ok
    }

    /// Returns true if the result indicates an error.
    pub fn is_err(self) -> bool {
        self != TesseraResult::Ok
    }
}

/// Error code type for C compatibility.
pub type ErrorCode = i32;

impl From<TesseraResult> for ErrorCode {
    fn from(result: TesseraResult) -> Self {
        result as ErrorCode
    }
}

impl From<ErrorCode> for TesseraResult {
    fn from(code: ErrorCode) -> Self {
        match code {
            0 => TesseraResult::Ok,
            2 => TesseraResult::InvalidArgument,
            3 => TesseraResult::NotFound,
            4 => TesseraResult::AlreadyExists,
            5 => TesseraResult::NullPointer,
            6 => TesseraResult::OutOfMemory,
            7 => TesseraResult::NotSupported,
            8 => TesseraResult::InvalidOperation,
            9 => TesseraResult::Cancelled,
            _ => TesseraResult::Error,
        }
    }
}

/// Errors raised at the ABI boundary.
#[derive(Debug, Error)]
pub enum FfiError {
    /// A required pointer argument was null.
    #[error("null pointer argument: {name}")]
    NullPointer {
        /// Name of the argument.
        name: &'static str,
    },

    /// A string argument was not UTF-8.
    #[error("invalid UTF-8 in {name}")]
    InvalidUtf8 {
        /// Name of the argument.
        name: &'static str,
    },

    /// An enum tag had no matching variant.
    #[error("unknown {what} tag {tag}")]
    UnknownTag {
        /// The enum being decoded.
        what: &'static str,
        /// The raw tag.
        tag: u32,
    },

    /// Any other malformed argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// The requested feature is not available.
    #[error("not supported: {message}")]
    NotSupported {
        /// Description of the feature.
        message: String,
    },

    /// The engine rejected the call.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for FFI internals.
pub type FfiResult<T> = Result<T, FfiError>;

impl FfiError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns the result code reported for this error.
    pub fn code(&self) -> TesseraResult {
        match self {
            Self::NullPointer { .. } => TesseraResult::NullPointer,
            Self::InvalidUtf8 { .. } | Self::UnknownTag { .. } | Self::InvalidArgument { .. } => {
                TesseraResult::InvalidArgument
            }
            Self::NotSupported { .. } => TesseraResult::NotSupported,
            Self::Engine(e) if e.is_not_found() => TesseraResult::NotFound,
            Self::Engine(e) => match e {
                EngineError::InvalidArgument { .. }
                | EngineError::InvalidSchema { .. }
                | EngineError::OutOfBounds { .. }
                | EngineError::Buffer { .. } => TesseraResult::InvalidArgument,
                EngineError::ArrayExists { .. } => TesseraResult::AlreadyExists,
                EngineError::UnsupportedLayout { .. } => TesseraResult::NotSupported,
                EngineError::InvalidOperation { .. } => TesseraResult::InvalidOperation,
                EngineError::Cancelled => TesseraResult::Cancelled,
                _ => TesseraResult::Error,
            },
        }
    }
}

/// A native error object handed out by [`tessera_ctx_get_last_error`].
#[derive(Debug)]
pub struct ErrorObject {
    message: CString,
}

impl ErrorObject {
    /// Creates an error object, dropping interior NULs from the message.
    pub fn new(message: &str) -> Self {
        let message = CString::new(message.replace('\0', "")).unwrap_or_default();
        Self { message }
    }

    /// Returns the message.
    pub fn message(&self) -> &CString {
        &self.message
    }
}

/// Runs `op` against a context, recording any failure in it.
///
/// The context's last error is cleared on entry. Panics are caught and
/// reported as [`TesseraResult::Error`].
pub(crate) fn guard<F>(ctx: *mut TesseraCtx, operation: &'static str, op: F) -> TesseraResult
where
    F: FnOnce(&ContextObject) -> FfiResult<()>,
{
    // SAFETY: callers pass a context obtained from `tessera_ctx_alloc`.
    let ctx = match unsafe { TesseraCtx::get_ref(ctx) } {
        Ok(ctx) => ctx,
        Err(e) => return e.code(),
    };
    ctx.clear_error();
    match catch_unwind(AssertUnwindSafe(|| op(ctx))) {
        Ok(Ok(())) => TesseraResult::Ok,
        Ok(Err(e)) => {
            tracing::trace!(operation, error = %e, "native call failed");
            ctx.set_error(format!("{operation}: {e}"));
            e.code()
        }
        Err(_) => {
            ctx.set_error(format!("{operation}: internal panic"));
            TesseraResult::Error
        }
    }
}

/// Runs `op`, handing any failure back as an error object through
/// `error_out` (which may be null).
pub(crate) fn guard_with_error<F>(
    error_out: *mut *mut TesseraError,
    operation: &'static str,
    op: F,
) -> TesseraResult
where
    F: FnOnce() -> FfiResult<()>,
{
    let outcome = match catch_unwind(AssertUnwindSafe(op)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err((e.code(), format!("{operation}: {e}"))),
        Err(_) => Err((TesseraResult::Error, format!("{operation}: internal panic"))),
    };
    let (code, error) = match outcome {
        Ok(()) => (TesseraResult::Ok, std::ptr::null_mut()),
        Err((code, message)) => (code, TesseraError::wrap(ErrorObject::new(&message))),
    };
    if error_out.is_null() {
        let mut error = error;
        // SAFETY: `error` is null or was just created by `wrap`.
        unsafe { TesseraError::release(&mut error) };
    } else {
        // SAFETY: checked non-null; callers pass a writable slot.
        unsafe { *error_out = error };
    }
    code
}

/// Retrieves the last error recorded in a context.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `error_out` - Receives a new error object, or null if the last call
///   on this context succeeded
///
/// # Returns
///
/// `TesseraResult::Ok` on success, error code otherwise.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `error_out` must be a valid pointer
/// - A returned error object must be released with `tessera_error_free`
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_get_last_error(
    ctx: *mut TesseraCtx,
    error_out: *mut *mut TesseraError,
) -> TesseraResult {
    let ctx = match TesseraCtx::get_ref(ctx) {
        Ok(ctx) => ctx,
        Err(e) => return e.code(),
    };
    if error_out.is_null() {
        return TesseraResult::NullPointer;
    }
    *error_out = match ctx.last_error() {
        Some(message) => TesseraError::wrap(ErrorObject::new(&message)),
        None => std::ptr::null_mut(),
    };
    TesseraResult::Ok
}

/// Returns the message of an error object.
///
/// # Safety
///
/// - `error` must be a valid error handle
/// - `message_out` must be a valid pointer; the string stays valid until
///   the error object is freed
#[no_mangle]
pub unsafe extern "C" fn tessera_error_message(
    error: *mut TesseraError,
    message_out: *mut *const c_char,
) -> TesseraResult {
    let error = match TesseraError::get_ref(error) {
        Ok(error) => error,
        Err(e) => return e.code(),
    };
    if message_out.is_null() {
        return TesseraResult::NullPointer;
    }
    *message_out = error.message().as_ptr();
    TesseraResult::Ok
}

/// Frees an error object and nulls the handle.
///
/// # Safety
///
/// `error` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_error_free(error: *mut *mut TesseraError) {
    TesseraError::release(error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{tessera_ctx_alloc, tessera_ctx_free};
    use std::ffi::CStr;

    #[test]
    fn result_codes() {
        assert_eq!(TesseraResult::Ok as i32, 0);
        assert_eq!(TesseraResult::Error as i32, 1);
        assert!(TesseraResult::Ok.is_ok());
        assert!(TesseraResult::NotFound.is_err());
    }

    #[test]
    fn error_code_conversion() {
        let code: ErrorCode = TesseraResult::AlreadyExists.into();
        assert_eq!(code, 4);
        assert_eq!(TesseraResult::from(code), TesseraResult::AlreadyExists);
        assert_eq!(TesseraResult::from(77), TesseraResult::Error);
    }

    #[test]
    fn engine_errors_map_to_codes() {
        let not_found = FfiError::from(EngineError::field_not_found("a"));
        assert_eq!(not_found.code(), TesseraResult::NotFound);
        let exists = FfiError::from(EngineError::ArrayExists { uri: "x".into() });
        assert_eq!(exists.code(), TesseraResult::AlreadyExists);
        assert_eq!(
            FfiError::from(EngineError::Cancelled).code(),
            TesseraResult::Cancelled
        );
    }

    #[test]
    fn guard_records_and_clears_last_error() {
        unsafe {
            let mut ctx = std::ptr::null_mut();
            assert!(tessera_ctx_alloc(std::ptr::null_mut(), &mut ctx).is_ok());

            let code = guard(ctx, "test_op", |_| Err(FfiError::invalid_argument("bad")));
            assert_eq!(code, TesseraResult::InvalidArgument);

            let mut error = std::ptr::null_mut();
            assert!(tessera_ctx_get_last_error(ctx, &mut error).is_ok());
            assert!(!error.is_null());
            let mut message = std::ptr::null();
            assert!(tessera_error_message(error, &mut message).is_ok());
            let text = CStr::from_ptr(message).to_str().unwrap();
            assert_eq!(text, "test_op: invalid argument: bad");
            tessera_error_free(&mut error);
            assert!(error.is_null());

            assert!(guard(ctx, "ok_op", |_| Ok(())).is_ok());
            assert!(tessera_ctx_get_last_error(ctx, &mut error).is_ok());
            assert!(error.is_null());

            tessera_ctx_free(&mut ctx);
        }
    }

    #[test]
    fn guard_catches_panics() {
        unsafe {
            let mut ctx = std::ptr::null_mut();
            assert!(tessera_ctx_alloc(std::ptr::null_mut(), &mut ctx).is_ok());
            let code = guard(ctx, "boom", |_| panic!("no"));
            assert_eq!(code, TesseraResult::Error);
            tessera_ctx_free(&mut ctx);
        }
    }

    #[test]
    fn null_context_is_rejected() {
        assert_eq!(
            guard(std::ptr::null_mut(), "op", |_| Ok(())),
            TesseraResult::NullPointer
        );
    }
}
