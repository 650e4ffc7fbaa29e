//! Process-wide engine statistics.

use std::ffi::CStr;

use tessera_ffi::{
    tessera_stats_disable, tessera_stats_dump_str, tessera_stats_enable, tessera_stats_free_str,
    tessera_stats_reset, TesseraResult,
};

use crate::error::{Error, Result};

fn check(status: TesseraResult, operation: &'static str) -> Result<()> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(Error::from_status(
            status,
            operation,
            "",
            format!("status {}", i32::from(status)),
        ))
    }
}

/// Starts collecting statistics.
pub fn enable() -> Result<()> {
    check(tessera_stats_enable(), "enable stats")
}

/// Stops collecting statistics. Counters keep their values.
pub fn disable() -> Result<()> {
    check(tessera_stats_disable(), "disable stats")
}

/// Zeroes every counter.
pub fn reset() -> Result<()> {
    check(tessera_stats_reset(), "reset stats")
}

/// Renders the counters as text.
pub fn dump() -> Result<String> {
    let mut raw = std::ptr::null_mut();
    // SAFETY: valid out-slot.
    check(unsafe { tessera_stats_dump_str(&mut raw) }, "dump stats")?;
    if raw.is_null() {
        return Err(Error::Allocation { what: "stats dump" });
    }
    // SAFETY: the engine returned a NUL-terminated string we now own.
    let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
    // SAFETY: `raw` came from `tessera_stats_dump_str` and is freed once.
    check(unsafe { tessera_stats_free_str(&mut raw) }, "free stats dump")?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_lists_counters() {
        enable().unwrap();
        let text = dump().unwrap();
        assert!(text.starts_with("tessera engine statistics"));
        assert!(text.contains("read_submits"));
        disable().unwrap();
    }
}
