use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::QuillError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on tasks InProgress at the same time.
    pub max_concurrency: usize,

    /// How long the loop waits before re-checking blocked tasks when nothing
    /// else wakes it. Completions and submissions wake it immediately.
    pub backoff: Duration,
}

impl SchedulerConfig {
    pub const DEFAULT_MAX_CONCURRENCY: usize = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), QuillError> {
        if self.max_concurrency == 0 {
            return Err(QuillError::InvalidConfig {
                key: "max_concurrency".into(),
                value: "0".into(),
            });
        }
        if self.backoff.is_zero() {
            return Err(QuillError::InvalidConfig {
                key: "backoff".into(),
                value: format!("{:?}", self.backoff),
            });
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: Self::DEFAULT_MAX_CONCURRENCY,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = SchedulerConfig::default()
            .with_max_concurrency(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, QuillError::InvalidConfig { key, .. } if key == "max_concurrency"));
    }

    #[test]
    fn zero_backoff_is_rejected() {
        let cfg = SchedulerConfig::default().with_backoff(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }
}
