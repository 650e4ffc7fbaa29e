//! Contexts, configuration objects, datatypes and statistics.

use std::collections::BTreeMap;
use std::ffi::{c_char, CString};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tessera_engine::{stats, CancelToken, Datatype, EngineConfig};

use crate::buffer::{str_arg, write_out};
use crate::error::{guard, guard_with_error, FfiError, FfiResult, TesseraResult};
use crate::types::{Opaque, TesseraConfig, TesseraCtx, TesseraError};

/// Parameter storage. Replaced values are retired rather than dropped, so a
/// value handed out by `tessera_config_get` stays readable for the life of
/// the configuration even if another handle overwrites the key.
#[derive(Debug)]
struct Params {
    values: BTreeMap<String, CString>,
    retired: Vec<CString>,
}

impl Params {
    fn from_engine(config: &EngineConfig) -> Self {
        let values = config
            .to_params()
            .into_iter()
            .filter_map(|(key, value)| Some((key.to_string(), CString::new(value).ok()?)))
            .collect();
        Self {
            values,
            retired: Vec::new(),
        }
    }

    fn insert(&mut self, key: &str, value: CString) {
        if let Some(old) = self.values.insert(key.to_string(), value) {
            self.retired.push(old);
        }
    }

    fn remove(&mut self, key: &str) {
        if let Some(old) = self.values.remove(key) {
            self.retired.push(old);
        }
    }
}

/// A configuration object: string parameters shared by reference count.
#[derive(Debug, Clone)]
pub struct ConfigObject {
    params: Arc<Mutex<Params>>,
}

impl Default for ConfigObject {
    fn default() -> Self {
        Self::from_engine(&EngineConfig::default())
    }
}

impl ConfigObject {
    /// Builds a fresh object holding `config`'s parameters.
    pub(crate) fn from_engine(config: &EngineConfig) -> Self {
        Self {
            params: Arc::new(Mutex::new(Params::from_engine(config))),
        }
    }

    /// Returns an independent copy of the parameters.
    fn deep_copy(&self) -> Self {
        let values = self.params.lock().values.clone();
        Self {
            params: Arc::new(Mutex::new(Params {
                values,
                retired: Vec::new(),
            })),
        }
    }

    fn set(&self, key: &str, value: &str) -> FfiResult<()> {
        // Validates known keys; unknown keys pass through.
        EngineConfig::from_params([(key, value)])?;
        let value = CString::new(value)
            .map_err(|_| FfiError::invalid_argument("config value contains NUL"))?;
        self.params.lock().insert(key, value);
        Ok(())
    }

    fn unset(&self, key: &str) {
        let default = EngineConfig::default()
            .to_params()
            .into_iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| CString::new(v).ok());
        let mut params = self.params.lock();
        match default {
            Some(value) => params.insert(key, value),
            None => params.remove(key),
        }
    }

    /// Parses the parameters into an engine configuration.
    pub fn engine_config(&self) -> FfiResult<EngineConfig> {
        let params = self.params.lock();
        let pairs = params
            .values
            .iter()
            .map(|(k, v)| {
                v.to_str()
                    .map(|v| (k.as_str(), v))
                    .map_err(|_| FfiError::InvalidUtf8 { name: "config value" })
            })
            .collect::<FfiResult<Vec<_>>>()?;
        Ok(EngineConfig::from_params(pairs)?)
    }
}

/// The object behind a context handle.
#[derive(Debug)]
pub struct ContextObject {
    config: ConfigObject,
    tags: Mutex<BTreeMap<String, String>>,
    last_error: Mutex<Option<String>>,
    cancel: Arc<CancelToken>,
}

impl ContextObject {
    fn new(config: ConfigObject) -> Self {
        Self {
            config,
            tags: Mutex::new(BTreeMap::new()),
            last_error: Mutex::new(None),
            cancel: Arc::new(CancelToken::new()),
        }
    }

    pub(crate) fn clear_error(&self) {
        *self.last_error.lock() = None;
    }

    pub(crate) fn set_error(&self, message: String) {
        *self.last_error.lock() = Some(message);
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Returns the engine configuration for new queries and subarrays.
    pub(crate) fn engine_config(&self) -> FfiResult<EngineConfig> {
        self.config.engine_config()
    }

    /// Returns the token cancelling every query of this context.
    pub(crate) fn cancel_token(&self) -> &Arc<CancelToken> {
        &self.cancel
    }
}

/// Parses a raw ABI enum tag.
pub(crate) fn enum_arg<T>(
    tag: u32,
    what: &'static str,
    parse: fn(u32) -> Option<T>,
) -> FfiResult<T> {
    parse(tag).ok_or(FfiError::UnknownTag { what, tag })
}

/// Parses a raw datatype tag.
pub(crate) fn datatype_arg(tag: u32) -> FfiResult<Datatype> {
    enum_arg(tag, "datatype", Datatype::from_u32)
}

// === Config ===

/// Allocates a configuration object holding the defaults.
///
/// # Arguments
///
/// * `config_out` - Output pointer for the configuration handle
/// * `error_out` - Receives an error object on failure; may be null
///
/// # Safety
///
/// `config_out` must be a valid pointer.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_alloc(
    config_out: *mut *mut TesseraConfig,
    error_out: *mut *mut TesseraError,
) -> TesseraResult {
    guard_with_error(error_out, "tessera_config_alloc", || {
        write_out(
            config_out,
            "config_out",
            TesseraConfig::wrap(ConfigObject::default()),
        )
    })
}

/// Frees a configuration handle and nulls it. Other handles sharing the
/// same parameters keep them alive.
///
/// # Safety
///
/// `config` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_config_free(config: *mut *mut TesseraConfig) {
    TesseraConfig::release(config);
}

/// Sets a configuration parameter. Known keys are validated.
///
/// # Safety
///
/// - `config` must be a valid configuration handle
/// - `key` and `value` must be valid NUL-terminated strings
#[no_mangle]
pub unsafe extern "C" fn tessera_config_set(
    config: *mut TesseraConfig,
    key: *const c_char,
    value: *const c_char,
    error_out: *mut *mut TesseraError,
) -> TesseraResult {
    guard_with_error(error_out, "tessera_config_set", || {
        let config = TesseraConfig::get_ref(config)?;
        config.set(str_arg(key, "key")?, str_arg(value, "value")?)
    })
}

/// Gets a configuration parameter.
///
/// # Arguments
///
/// * `value_out` - Receives the value, or null if the key is not set. The
///   string stays valid until the key is next set or unset.
///
/// # Safety
///
/// - `config` must be a valid configuration handle
/// - `key` must be a valid NUL-terminated string
/// - `value_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_config_get(
    config: *mut TesseraConfig,
    key: *const c_char,
    value_out: *mut *const c_char,
    error_out: *mut *mut TesseraError,
) -> TesseraResult {
    guard_with_error(error_out, "tessera_config_get", || {
        let config = TesseraConfig::get_ref(config)?;
        let key = str_arg(key, "key")?;
        let value = config
            .params
            .lock()
            .values
            .get(key)
            .map_or(std::ptr::null(), |v| v.as_ptr());
        write_out(value_out, "value_out", value)
    })
}

/// Resets a parameter to its default, or removes it if it has none.
///
/// # Safety
///
/// - `config` must be a valid configuration handle
/// - `key` must be a valid NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn tessera_config_unset(
    config: *mut TesseraConfig,
    key: *const c_char,
    error_out: *mut *mut TesseraError,
) -> TesseraResult {
    guard_with_error(error_out, "tessera_config_unset", || {
        TesseraConfig::get_ref(config)?.unset(str_arg(key, "key")?);
        Ok(())
    })
}

// === Context ===

/// Allocates a context.
///
/// # Arguments
///
/// * `config` - Configuration to copy into the context; null for defaults
/// * `ctx_out` - Output pointer for the context handle
///
/// # Returns
///
/// `TesseraResult::Ok` on success, error code otherwise.
///
/// # Safety
///
/// - `config` must be null or a valid configuration handle
/// - `ctx_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_alloc(
    config: *mut TesseraConfig,
    ctx_out: *mut *mut TesseraCtx,
) -> TesseraResult {
    if ctx_out.is_null() {
        return TesseraResult::NullPointer;
    }
    let config = if config.is_null() {
        ConfigObject::default()
    } else {
        match TesseraConfig::get_ref(config) {
            Ok(config) => config.deep_copy(),
            Err(e) => return e.code(),
        }
    };
    if let Err(e) = config.engine_config() {
        return e.code();
    }
    *ctx_out = TesseraCtx::wrap(ContextObject::new(config));
    tracing::debug!("allocated context");
    TesseraResult::Ok
}

/// Frees a context and nulls the handle.
///
/// # Safety
///
/// `ctx` must be null or point to a handle from this library. Objects
/// created through the context must not be used with it afterwards.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_free(ctx: *mut *mut TesseraCtx) {
    TesseraCtx::release(ctx);
}

/// Returns a configuration handle sharing the context's parameters.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `config_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_get_config(
    ctx: *mut TesseraCtx,
    config_out: *mut *mut TesseraConfig,
) -> TesseraResult {
    guard(ctx, "tessera_ctx_get_config", |ctx| {
        write_out(
            config_out,
            "config_out",
            TesseraConfig::wrap(ctx.config.clone()),
        )
    })
}

/// Attaches a key/value tag to the context.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `key` and `value` must be valid NUL-terminated strings
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_set_tag(
    ctx: *mut TesseraCtx,
    key: *const c_char,
    value: *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_ctx_set_tag", |ctx| {
        let key = str_arg(key, "key")?;
        let value = str_arg(value, "value")?;
        ctx.tags.lock().insert(key.to_string(), value.to_string());
        Ok(())
    })
}

/// Cancels every query currently submitted through the context.
///
/// # Safety
///
/// `ctx` must be a valid context handle.
#[no_mangle]
pub unsafe extern "C" fn tessera_ctx_cancel_tasks(ctx: *mut TesseraCtx) -> TesseraResult {
    guard(ctx, "tessera_ctx_cancel_tasks", |ctx| {
        ctx.cancel.cancel();
        tracing::debug!(tags = ?ctx.tags.lock(), "cancelled context tasks");
        Ok(())
    })
}

// === Datatypes ===

fn datatype_names() -> &'static [CString] {
    static NAMES: OnceLock<Vec<CString>> = OnceLock::new();
    NAMES.get_or_init(|| {
        Datatype::ALL
            .iter()
            .filter_map(|dt| CString::new(dt.as_str()).ok())
            .collect()
    })
}

/// Returns the width in bytes of one value of `datatype`, or 0 for an
/// unknown tag.
#[no_mangle]
pub extern "C" fn tessera_datatype_size(datatype: u32) -> u64 {
    Datatype::from_u32(datatype).map_or(0, Datatype::size)
}

/// Returns the canonical name of a datatype.
///
/// # Safety
///
/// `name_out` must be a valid pointer. The string is static.
#[no_mangle]
pub unsafe extern "C" fn tessera_datatype_to_str(
    datatype: u32,
    name_out: *mut *const c_char,
) -> TesseraResult {
    if name_out.is_null() {
        return TesseraResult::NullPointer;
    }
    match datatype_names().get(datatype as usize) {
        Some(name) => {
            *name_out = name.as_ptr();
            TesseraResult::Ok
        }
        None => TesseraResult::InvalidArgument,
    }
}

/// Parses a canonical datatype name.
///
/// # Safety
///
/// - `name` must be a valid NUL-terminated string
/// - `datatype_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_datatype_from_str(
    name: *const c_char,
    datatype_out: *mut u32,
) -> TesseraResult {
    let name = match str_arg(name, "name") {
        Ok(name) => name,
        Err(e) => return e.code(),
    };
    match Datatype::ALL.iter().find(|dt| dt.as_str() == name) {
        Some(dt) if !datatype_out.is_null() => {
            *datatype_out = dt.as_u32();
            TesseraResult::Ok
        }
        Some(_) => TesseraResult::NullPointer,
        None => TesseraResult::InvalidArgument,
    }
}

// === Statistics ===

/// Starts collecting statistics.
#[no_mangle]
pub extern "C" fn tessera_stats_enable() -> TesseraResult {
    stats::global().enable();
    TesseraResult::Ok
}

/// Stops collecting statistics.
#[no_mangle]
pub extern "C" fn tessera_stats_disable() -> TesseraResult {
    stats::global().disable();
    TesseraResult::Ok
}

/// Zeroes every counter. Not synchronised with queries in flight.
#[no_mangle]
pub extern "C" fn tessera_stats_reset() -> TesseraResult {
    stats::global().reset();
    TesseraResult::Ok
}

/// Renders the statistics as a newly allocated string.
///
/// # Safety
///
/// `out` must be a valid pointer. The string must be released with
/// `tessera_stats_free_str`.
#[no_mangle]
pub unsafe extern "C" fn tessera_stats_dump_str(out: *mut *mut c_char) -> TesseraResult {
    if out.is_null() {
        return TesseraResult::NullPointer;
    }
    match CString::new(stats::global().dump()) {
        Ok(dump) => {
            *out = dump.into_raw();
            TesseraResult::Ok
        }
        Err(_) => TesseraResult::Error,
    }
}

/// Frees a string from `tessera_stats_dump_str` and nulls the pointer.
///
/// # Safety
///
/// `out` must be null or point to a string from `tessera_stats_dump_str`.
#[no_mangle]
pub unsafe extern "C" fn tessera_stats_free_str(out: *mut *mut c_char) -> TesseraResult {
    if !out.is_null() && !(*out).is_null() {
        drop(CString::from_raw(*out));
        *out = std::ptr::null_mut();
    }
    TesseraResult::Ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn config_set_get_unset() {
        unsafe {
            let mut config = std::ptr::null_mut();
            let mut error = std::ptr::null_mut();
            assert!(tessera_config_alloc(&mut config, &mut error).is_ok());
            assert!(error.is_null());

            let key = c("sm.memory_budget");
            let budget = c("1024");
            assert!(tessera_config_set(config, key.as_ptr(), budget.as_ptr(), &mut error).is_ok());
            let mut value = std::ptr::null();
            assert!(tessera_config_get(config, key.as_ptr(), &mut value, &mut error).is_ok());
            assert_eq!(CStr::from_ptr(value).to_str().unwrap(), "1024");

            let code = tessera_config_set(config, key.as_ptr(), c("lots").as_ptr(), &mut error);
            assert_eq!(code, TesseraResult::InvalidArgument);
            assert!(!error.is_null());
            crate::error::tessera_error_free(&mut error);

            assert!(tessera_config_unset(config, key.as_ptr(), &mut error).is_ok());
            assert!(tessera_config_get(config, key.as_ptr(), &mut value, &mut error).is_ok());
            assert_eq!(
                CStr::from_ptr(value).to_str().unwrap(),
                EngineConfig::default().memory_budget.to_string()
            );

            let custom = c("app.tag");
            let tag = c("x");
            let status = tessera_config_set(config, custom.as_ptr(), tag.as_ptr(), &mut error);
            assert!(status.is_ok());
            assert!(tessera_config_unset(config, custom.as_ptr(), &mut error).is_ok());
            assert!(tessera_config_get(config, custom.as_ptr(), &mut value, &mut error).is_ok());
            assert!(value.is_null());

            tessera_config_free(&mut config);
            assert!(config.is_null());
        }
    }

    #[test]
    fn context_config_is_shared() {
        unsafe {
            let mut ctx = std::ptr::null_mut();
            assert!(tessera_ctx_alloc(std::ptr::null_mut(), &mut ctx).is_ok());
            let mut first = std::ptr::null_mut();
            let mut second = std::ptr::null_mut();
            assert!(tessera_ctx_get_config(ctx, &mut first).is_ok());
            assert!(tessera_ctx_get_config(ctx, &mut second).is_ok());

            let key = c("sm.read_range_oob");
            let mut error = std::ptr::null_mut();
            let level = c("error");
            assert!(tessera_config_set(first, key.as_ptr(), level.as_ptr(), &mut error).is_ok());
            tessera_config_free(&mut first);

            let mut value = std::ptr::null();
            assert!(tessera_config_get(second, key.as_ptr(), &mut value, &mut error).is_ok());
            assert_eq!(CStr::from_ptr(value).to_str().unwrap(), "error");
            tessera_config_free(&mut second);

            assert!(tessera_ctx_set_tag(ctx, c("app").as_ptr(), c("test").as_ptr()).is_ok());
            assert!(tessera_ctx_cancel_tasks(ctx).is_ok());
            tessera_ctx_free(&mut ctx);
            assert!(ctx.is_null());
        }
    }

    #[test]
    fn datatype_functions() {
        assert_eq!(tessera_datatype_size(Datatype::Int16.as_u32()), 2);
        assert_eq!(tessera_datatype_size(999), 0);
        unsafe {
            let mut name = std::ptr::null();
            assert!(tessera_datatype_to_str(Datatype::Float64.as_u32(), &mut name).is_ok());
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "FLOAT64");
            assert!(tessera_datatype_to_str(999, &mut name).is_err());

            let mut tag = 0;
            assert!(tessera_datatype_from_str(c("BOOL").as_ptr(), &mut tag).is_ok());
            assert_eq!(tag, Datatype::Bool.as_u32());
            assert!(tessera_datatype_from_str(c("NOPE").as_ptr(), &mut tag).is_err());
        }
    }

    #[test]
    fn stats_dump_round_trip() {
        unsafe {
            let mut dump = std::ptr::null_mut();
            assert!(tessera_stats_dump_str(&mut dump).is_ok());
            assert!(CStr::from_ptr(dump)
                .to_str()
                .unwrap()
                .contains("read_submits"));
            assert!(tessera_stats_free_str(&mut dump).is_ok());
            assert!(dump.is_null());
        }
    }
}
