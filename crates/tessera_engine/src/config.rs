//! Engine configuration.
//!
//! The C ABI exposes configuration as string key/value pairs. `EngineConfig`
//! is the typed view the engine works with; [`EngineConfig::from_params`]
//! parses the recognised keys and ignores the rest.

use crate::error::{EngineError, EngineResult};

/// Key for the per-submission read memory budget, in bytes.
pub const MEMORY_BUDGET_KEY: &str = "sm.memory_budget";
/// Key for the out-of-bounds range policy (`error` or `warn`).
pub const READ_RANGE_OOB_KEY: &str = "sm.read_range_oob";
/// Key for the default sparse tile capacity.
pub const TILE_CAPACITY_KEY: &str = "sm.tile_capacity";

/// What to do when a subarray range exceeds the dimension domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobPolicy {
    /// Reject the range.
    Error,
    /// Clamp the range to the domain and log a warning.
    Warn,
}

impl OobPolicy {
    fn parse(value: &str) -> EngineResult<Self> {
        match value {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            other => Err(EngineError::invalid_argument(format!(
                "{READ_RANGE_OOB_KEY} must be 'error' or 'warn', got '{other}'"
            ))),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
        }
    }
}

/// Configuration for queries and subarrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum bytes of result data a single read submission produces.
    pub memory_budget: u64,

    /// Policy for ranges outside the dimension domain.
    pub read_range_oob: OobPolicy,

    /// Capacity given to new sparse schemas.
    pub tile_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_budget: 5 * 1024 * 1024 * 1024, // 5 GB
            read_range_oob: OobPolicy::Warn,
            tile_capacity: 10_000,
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read memory budget.
    #[must_use]
    pub const fn memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Sets the out-of-bounds range policy.
    #[must_use]
    pub const fn read_range_oob(mut self, policy: OobPolicy) -> Self {
        self.read_range_oob = policy;
        self
    }

    /// Sets the default tile capacity.
    #[must_use]
    pub const fn tile_capacity(mut self, capacity: u64) -> Self {
        self.tile_capacity = capacity;
        self
    }

    /// Builds a configuration from key/value parameters.
    ///
    /// Unknown keys are ignored; known keys with malformed values fail.
    pub fn from_params<'a, I>(params: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in params {
            match key {
                MEMORY_BUDGET_KEY => config.memory_budget = parse_u64(key, value)?,
                READ_RANGE_OOB_KEY => config.read_range_oob = OobPolicy::parse(value)?,
                TILE_CAPACITY_KEY => config.tile_capacity = parse_u64(key, value)?,
                _ => {}
            }
        }
        if config.memory_budget == 0 {
            return Err(EngineError::invalid_argument(format!(
                "{MEMORY_BUDGET_KEY} must be positive"
            )));
        }
        Ok(config)
    }

    /// Returns the configuration as key/value parameters.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        vec![
            (MEMORY_BUDGET_KEY, self.memory_budget.to_string()),
            (READ_RANGE_OOB_KEY, self.read_range_oob.as_str().to_string()),
            (TILE_CAPACITY_KEY, self.tile_capacity.to_string()),
        ]
    }
}

fn parse_u64(key: &str, value: &str) -> EngineResult<u64> {
    value
        .parse()
        .map_err(|_| {
            EngineError::invalid_argument(format!("{key} expects an integer, got '{value}'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.read_range_oob, OobPolicy::Warn);
        assert_eq!(config.tile_capacity, 10_000);
    }

    #[test]
    fn builder_pattern() {
        let config = EngineConfig::new()
            .memory_budget(1024)
            .read_range_oob(OobPolicy::Error);

        assert_eq!(config.memory_budget, 1024);
        assert_eq!(config.read_range_oob, OobPolicy::Error);
    }

    #[test]
    fn params_round_trip() {
        let config = EngineConfig::new().memory_budget(64).tile_capacity(7);
        let params = config.to_params();
        let parsed =
            EngineConfig::from_params(params.iter().map(|(k, v)| (*k, v.as_str()))).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(EngineConfig::from_params([(MEMORY_BUDGET_KEY, "lots")]).is_err());
        assert!(EngineConfig::from_params([(READ_RANGE_OOB_KEY, "ignore")]).is_err());
        assert!(EngineConfig::from_params([(MEMORY_BUDGET_KEY, "0")]).is_err());
        assert!(EngineConfig::from_params([("vfs.s3.region", "eu")]).is_ok());
    }
}
