//! Native configuration objects.
//!
//! A [`Config`] is a string key/value store. Known keys:
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `sm.memory_budget` | Bytes of result data one read submission may produce | `5368709120` |
//! | `sm.read_range_oob` | `error` or `warn` for ranges outside the domain | `warn` |
//! | `sm.tile_capacity` | Default capacity of new sparse schemas | `10000` |
//!
//! Configs obtained from the same context share their parameters.

use tessera_ffi::{
    tessera_config_alloc, tessera_config_free, tessera_config_get, tessera_config_set,
    tessera_config_unset, TesseraConfig, TesseraError, TesseraResult,
};

use crate::context::{c_string, from_c_string, take_error};
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};

/// A native configuration object.
#[derive(Debug, Clone)]
pub struct Config {
    handle: NativeHandle<TesseraConfig>,
}

/// Turns a status plus error object into a result.
fn check(
    status: TesseraResult,
    error: *mut TesseraError,
    operation: &'static str,
    subject: &str,
) -> Result<()> {
    // SAFETY: the error object, if any, was handed to us by the call.
    let message = unsafe { take_error(error) }?;
    if status.is_ok() {
        return Ok(());
    }
    let message = message.unwrap_or_else(|| format!("status {}", i32::from(status)));
    Err(Error::from_status(status, operation, subject, message))
}

impl Config {
    /// Creates a configuration holding the defaults.
    pub fn new() -> Result<Self> {
        let (mut ptr, mut error) = (std::ptr::null_mut(), std::ptr::null_mut());
        // SAFETY: both out-slots are valid.
        let status = unsafe { tessera_config_alloc(&mut ptr, &mut error) };
        check(status, error, "allocate config", "")?;
        Self::from_raw(ptr)
    }

    pub(crate) fn from_raw(ptr: *mut TesseraConfig) -> Result<Self> {
        // SAFETY: `ptr` was just handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_config_free, "config") }?;
        Ok(Self { handle })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraConfig>> {
        self.handle.get()
    }

    /// Sets a parameter. Known keys are validated.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let c_key = c_string(key, "config key")?;
        let c_value = c_string(value, "config value")?;
        let mut error = std::ptr::null_mut();
        // SAFETY: live config; strings outlive the call.
        let status = unsafe {
            tessera_config_set(*self.ptr()?, c_key.as_ptr(), c_value.as_ptr(), &mut error)
        };
        check(status, error, "set config", key)
    }

    /// Returns a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for a key that is not set.
    pub fn get(&self, key: &str) -> Result<String> {
        let c_key = c_string(key, "config key")?;
        let (mut value, mut error) = (std::ptr::null(), std::ptr::null_mut());
        let config = self.ptr()?;
        // SAFETY: live config; valid out-slots.
        let status =
            unsafe { tessera_config_get(*config, c_key.as_ptr(), &mut value, &mut error) };
        check(status, error, "get config", key)?;
        if value.is_null() {
            return Err(Error::NotFound {
                operation: "get config",
                subject: key.to_string(),
                message: "parameter is not set".into(),
            });
        }
        // SAFETY: non-null values are NUL-terminated strings the config keeps
        // alive while `config` pins it.
        Ok(unsafe { from_c_string(value) })
    }

    /// Resets a parameter to its default, or removes it.
    pub fn unset(&self, key: &str) -> Result<()> {
        let c_key = c_string(key, "config key")?;
        let mut error = std::ptr::null_mut();
        // SAFETY: live config.
        let status =
            unsafe { tessera_config_unset(*self.ptr()?, c_key.as_ptr(), &mut error) };
        check(status, error, "unset config", key)
    }

    /// Releases this handle's reference to the native object.
    pub fn free(&self) {
        self.handle.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    #[test]
    fn set_get_unset() {
        let config = Config::new().unwrap();
        assert_eq!(config.get("sm.read_range_oob").unwrap(), "warn");
        config.set("sm.read_range_oob", "error").unwrap();
        assert_eq!(config.get("sm.read_range_oob").unwrap(), "error");
        config.unset("sm.read_range_oob").unwrap();
        assert_eq!(config.get("sm.read_range_oob").unwrap(), "warn");

        let err = config.set("sm.memory_budget", "lots").unwrap_err();
        assert!(matches!(err, Error::Native { .. }), "{err}");
        assert!(err.to_string().contains("sm.memory_budget"));

        config.set("app.custom", "1").unwrap();
        config.unset("app.custom").unwrap();
        assert!(config.get("app.custom").unwrap_err().is_not_found());
    }

    #[test]
    fn context_config_is_copied_then_shared() {
        let config = Config::new().unwrap();
        config.set("sm.tile_capacity", "64").unwrap();
        let ctx = Context::new(Some(&config)).unwrap();
        config.set("sm.tile_capacity", "128").unwrap();

        let first = ctx.config().unwrap();
        assert_eq!(first.get("sm.tile_capacity").unwrap(), "64");
        let second = ctx.config().unwrap();
        second.set("sm.tile_capacity", "32").unwrap();
        assert_eq!(first.get("sm.tile_capacity").unwrap(), "32");
    }
}
