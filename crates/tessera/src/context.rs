//! Contexts: the scope of every native call.

use std::ffi::{c_char, CStr, CString};

use tessera_ffi::{
    tessera_ctx_alloc, tessera_ctx_cancel_tasks, tessera_ctx_free, tessera_ctx_get_config,
    tessera_ctx_get_last_error, tessera_ctx_set_tag, tessera_error_free, tessera_error_message,
    TesseraCtx, TesseraError, TesseraResult,
};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};

/// Converts a Rust string for a native call.
pub(crate) fn c_string(value: &str, what: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| Error::invalid_argument(format!("{what} contains a NUL byte")))
}

/// Copies a NUL-terminated string the engine returned.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn from_c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Takes ownership of a native error object and returns its message.
///
/// # Safety
///
/// `error` must be null or an error handle nobody else frees.
pub(crate) unsafe fn take_error(error: *mut TesseraError) -> Result<Option<String>> {
    if error.is_null() {
        return Ok(None);
    }
    let handle = NativeHandle::acquire(error, tessera_error_free, "error")?;
    let mut message = std::ptr::null();
    let status = tessera_error_message(*handle.get()?, &mut message);
    if status.is_err() {
        return Err(Error::from_status(
            status,
            "read error message",
            "",
            "error object unreadable".into(),
        ));
    }
    Ok(Some(from_c_string(message)))
}

/// A native context.
///
/// Clones share the native context, its configuration and its last-error
/// slot. Contexts are safe to share across threads.
#[derive(Debug, Clone)]
pub struct Context {
    handle: NativeHandle<TesseraCtx>,
}

impl Context {
    /// Creates a context, copying `config` if given.
    pub fn new(config: Option<&Config>) -> Result<Self> {
        let config = config.map(Config::ptr).transpose()?;
        let config_ptr = config.as_ref().map_or(std::ptr::null_mut(), |guard| **guard);
        let mut ptr = std::ptr::null_mut();
        // SAFETY: `config_ptr` is null or pinned by `config`; `ptr` is a
        // valid out-slot.
        let status = unsafe { tessera_ctx_alloc(config_ptr, &mut ptr) };
        if status.is_err() {
            return Err(Error::from_status(
                status,
                "allocate context",
                "",
                format!("status {}", i32::from(status)),
            ));
        }
        // SAFETY: freshly allocated and owned by nobody else.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_ctx_free, "context") }?;
        tracing::debug!("context created");
        Ok(Self { handle })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraCtx>> {
        self.handle.get()
    }

    /// Turns a native status into a result, fetching the engine's message
    /// on failure.
    pub(crate) fn check(
        &self,
        status: TesseraResult,
        operation: &'static str,
        subject: &str,
    ) -> Result<()> {
        if status.is_ok() {
            return Ok(());
        }
        let message = self
            .last_error()?
            .unwrap_or_else(|| format!("status {}", i32::from(status)));
        Err(Error::from_status(status, operation, subject, message))
    }

    /// Returns the configuration the context was created with.
    ///
    /// The returned object shares state with the context's.
    pub fn config(&self) -> Result<Config> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe { tessera_ctx_get_config(*self.ptr()?, &mut ptr) };
        self.check(status, "get context config", "")?;
        Config::from_raw(ptr)
    }

    /// Attaches a tag to the context.
    pub fn set_tag(&self, key: &str, value: &str) -> Result<()> {
        let (c_key, c_value) = (c_string(key, "tag key")?, c_string(value, "tag value")?);
        // SAFETY: live context; both strings outlive the call.
        let status =
            unsafe { tessera_ctx_set_tag(*self.ptr()?, c_key.as_ptr(), c_value.as_ptr()) };
        self.check(status, "set context tag", key)
    }

    /// Cancels every submission running under this context.
    pub fn cancel_tasks(&self) -> Result<()> {
        // SAFETY: live context.
        let status = unsafe { tessera_ctx_cancel_tasks(*self.ptr()?) };
        tracing::debug!("context tasks cancelled");
        self.check(status, "cancel tasks", "")
    }

    /// Returns the message of the last failed call on this context.
    pub fn last_error(&self) -> Result<Option<String>> {
        let mut error = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe { tessera_ctx_get_last_error(*self.ptr()?, &mut error) };
        if status.is_err() {
            return Err(Error::from_status(
                status,
                "get last error",
                "",
                format!("status {}", i32::from(status)),
            ));
        }
        // SAFETY: the error object is handed to us.
        unsafe { take_error(error) }
    }

    /// Releases the native context. Objects created from it fail with
    /// [`Error::HandleFreed`] afterwards.
    pub fn free(&self) {
        self.handle.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_calls_leave_a_message() {
        let ctx = Context::new(None).unwrap();
        assert_eq!(ctx.last_error().unwrap(), None);
        let status = unsafe {
            tessera_ctx_set_tag(*ctx.ptr().unwrap(), std::ptr::null(), std::ptr::null())
        };
        let err = ctx.check(status, "set context tag", "k").unwrap_err();
        match err {
            Error::Native {
                operation, message, ..
            } => {
                assert_eq!(operation, "set context tag");
                assert!(message.starts_with("tessera_ctx_set_tag"), "{message}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tags_and_cancel() {
        let ctx = Context::new(None).unwrap();
        ctx.set_tag("app", "tests").unwrap();
        ctx.cancel_tasks().unwrap();
        assert!(ctx.set_tag("bad\0key", "x").is_err());
    }

    #[test]
    fn freed_context_fails_loudly() {
        let ctx = Context::new(None).unwrap();
        let clone = ctx.clone();
        ctx.free();
        assert!(matches!(
            clone.set_tag("a", "b"),
            Err(Error::HandleFreed { what: "context" })
        ));
    }
}
