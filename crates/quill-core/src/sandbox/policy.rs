use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::SafetyCategory;

/// Which safety categories a sandbox may run, plus its fallback deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    #[serde(default)]
    pub allow_restricted: bool,

    #[serde(default)]
    pub allow_unsafe: bool,

    /// Used when a request carries no timeout. Always capped by the
    /// operation's `max_duration`.
    #[serde(default)]
    pub default_timeout: Option<Duration>,
}

impl SandboxPolicy {
    /// Everything allowed. Meant for tests and trusted local tooling.
    pub fn permissive() -> Self {
        Self {
            allow_restricted: true,
            allow_unsafe: true,
            default_timeout: None,
        }
    }

    pub fn with_allow_restricted(mut self, allow: bool) -> Self {
        self.allow_restricted = allow;
        self
    }

    pub fn with_allow_unsafe(mut self, allow: bool) -> Self {
        self.allow_unsafe = allow;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn permits(&self, category: SafetyCategory) -> bool {
        match category {
            SafetyCategory::Safe => true,
            SafetyCategory::Restricted => self.allow_restricted,
            SafetyCategory::Unsafe => self.allow_unsafe,
        }
    }

    /// Name of the switch that must be on to run `category`.
    pub fn required_permission(category: SafetyCategory) -> Option<&'static str> {
        match category {
            SafetyCategory::Safe => None,
            SafetyCategory::Restricted => Some("allow_restricted"),
            SafetyCategory::Unsafe => Some("allow_unsafe"),
        }
    }
}
