//! Environment-driven configuration.
//!
//! | variable                   | field                            | default |
//! |----------------------------|----------------------------------|---------|
//! | `QUILL_MAX_CONCURRENCY`    | `scheduler.max_concurrency`      | 3       |
//! | `QUILL_BACKOFF_MS`         | `scheduler.backoff`              | 100     |
//! | `QUILL_ALLOW_RESTRICTED`   | `sandbox.allow_restricted`       | false   |
//! | `QUILL_ALLOW_UNSAFE`       | `sandbox.allow_unsafe`           | false   |
//! | `QUILL_DEFAULT_TIMEOUT_MS` | `sandbox.default_timeout`        | unset   |

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::QuillError;
use crate::sandbox::SandboxPolicy;
use crate::scheduler::SchedulerConfig;

pub const ENV_MAX_CONCURRENCY: &str = "QUILL_MAX_CONCURRENCY";
pub const ENV_BACKOFF_MS: &str = "QUILL_BACKOFF_MS";
pub const ENV_ALLOW_RESTRICTED: &str = "QUILL_ALLOW_RESTRICTED";
pub const ENV_ALLOW_UNSAFE: &str = "QUILL_ALLOW_UNSAFE";
pub const ENV_DEFAULT_TIMEOUT_MS: &str = "QUILL_DEFAULT_TIMEOUT_MS";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuillConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub sandbox: SandboxPolicy,
}

impl QuillConfig {
    pub fn from_env() -> Result<Self, QuillError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, QuillError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse::<usize>(&lookup, ENV_MAX_CONCURRENCY)? {
            config.scheduler.max_concurrency = n;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_BACKOFF_MS)? {
            config.scheduler.backoff = Duration::from_millis(ms);
        }
        if let Some(flag) = parse_flag(&lookup, ENV_ALLOW_RESTRICTED)? {
            config.sandbox.allow_restricted = flag;
        }
        if let Some(flag) = parse_flag(&lookup, ENV_ALLOW_UNSAFE)? {
            config.sandbox.allow_unsafe = flag;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_DEFAULT_TIMEOUT_MS)? {
            config.sandbox.default_timeout = Some(Duration::from_millis(ms));
        }

        config.scheduler.validate()?;
        Ok(config)
    }
}

fn invalid(key: &str, value: &str) -> QuillError {
    QuillError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, QuillError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| invalid(key, &raw)),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<bool>, QuillError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(invalid(key, &raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = QuillConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QuillConfig::default());
        assert_eq!(config.scheduler.max_concurrency, 3);
        assert!(!config.sandbox.allow_unsafe);
    }

    #[test]
    fn reads_every_key() {
        let config = QuillConfig::from_lookup(lookup(&[
            (ENV_MAX_CONCURRENCY, "8"),
            (ENV_BACKOFF_MS, "25"),
            (ENV_ALLOW_RESTRICTED, "true"),
            (ENV_ALLOW_UNSAFE, "0"),
            (ENV_DEFAULT_TIMEOUT_MS, "1500"),
        ]))
        .unwrap();

        assert_eq!(config.scheduler.max_concurrency, 8);
        assert_eq!(config.scheduler.backoff, Duration::from_millis(25));
        assert!(config.sandbox.allow_restricted);
        assert!(!config.sandbox.allow_unsafe);
        assert_eq!(config.sandbox.default_timeout, Some(Duration::from_millis(1500)));
    }

    #[rstest]
    #[case::not_a_number(ENV_MAX_CONCURRENCY, "many")]
    #[case::zero_concurrency(ENV_MAX_CONCURRENCY, "0")]
    #[case::negative_backoff(ENV_BACKOFF_MS, "-5")]
    #[case::bad_flag(ENV_ALLOW_UNSAFE, "maybe")]
    fn malformed_values_are_rejected(#[case] key: &str, #[case] value: &str) {
        let err = QuillConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
        assert!(matches!(err, QuillError::InvalidConfig { .. }));
    }
}
