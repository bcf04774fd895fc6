//! Workload configuration for the `blinktree` binary.
//!
//! This module loads the demo workload from environment variables.
//!
//! # Environment Variables
//!
//! - `BLINKTREE_ORDER`: Fanout bound of the tree (default: `2`, minimum `2`)
//! - `BLINKTREE_THREADS`: Number of inserting threads (default: `4`, minimum `1`)
//! - `BLINKTREE_KEYS`: Number of distinct keys to insert (default: `10000`)
//! - `BLINKTREE_SEED`: Seed for shuffling the keys (default: `42`)
//!
//! # Invariants
//!
//! - `order` is always at least [`MIN_ORDER`]
//! - `threads` is always at least 1

use std::str::FromStr;

use crate::btree::MIN_ORDER;

/// Demo workload configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Fanout bound passed to the tree.
    pub order: usize,
    /// Number of threads inserting concurrently.
    pub threads: usize,
    /// Keys `0..keys` are inserted, each exactly once.
    pub keys: u64,
    /// Seed for the insertion order.
    pub seed: u64,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            order: Self::DEFAULT_ORDER,
            threads: Self::DEFAULT_THREADS,
            keys: Self::DEFAULT_KEYS,
            seed: Self::DEFAULT_SEED,
        }
    }
}

impl WorkloadConfig {
    pub const DEFAULT_ORDER: usize = crate::btree::DEFAULT_ORDER;
    pub const DEFAULT_THREADS: usize = 4;
    pub const DEFAULT_KEYS: u64 = 10_000;
    pub const DEFAULT_SEED: u64 = 42;

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a number, or is
    /// below its minimum.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            order: load_var("BLINKTREE_ORDER", Self::DEFAULT_ORDER, &MIN_ORDER)?,
            threads: load_var("BLINKTREE_THREADS", Self::DEFAULT_THREADS, &1)?,
            keys: load_var("BLINKTREE_KEYS", Self::DEFAULT_KEYS, &0)?,
            seed: load_var("BLINKTREE_SEED", Self::DEFAULT_SEED, &0)?,
        })
    }
}

/// Load a numeric variable from the environment.
fn load_var<T>(name: &str, default: T, min: &T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + std::fmt::Display,
{
    parse_var(name, std::env::var(name).ok(), default, min)
}

/// Parse an optional raw value, falling back to `default` when unset.
fn parse_var<T>(name: &str, raw: Option<String>, default: T, min: &T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(default);
    };

    let value = raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!("'{raw}' is not a valid number"),
    })?;

    if value < *min {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("must be at least {min}, got {value}"),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = WorkloadConfig::default();
        assert_eq!(config.order, 2);
        assert_eq!(config.threads, 4);
        assert_eq!(config.keys, 10_000);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_parse_var_unset_uses_default() {
        assert_eq!(parse_var::<usize>("X", None, 7, &1), Ok(7));
    }

    #[test]
    fn test_parse_var_accepts_valid_value() {
        assert_eq!(parse_var::<usize>("X", Some(" 16 ".to_string()), 2, &2), Ok(16));
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        let error = parse_var::<usize>("BLINKTREE_ORDER", Some("many".to_string()), 2, &2)
            .expect_err("garbage must be rejected");
        assert_eq!(
            error.to_string(),
            "invalid value for BLINKTREE_ORDER: 'many' is not a valid number"
        );
    }

    #[test]
    fn test_parse_var_rejects_below_minimum() {
        let error = parse_var::<usize>("BLINKTREE_ORDER", Some("1".to_string()), 2, &MIN_ORDER)
            .expect_err("order 1 must be rejected");
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: "BLINKTREE_ORDER".to_string(),
                message: "must be at least 2, got 1".to_string(),
            }
        );
    }
}
