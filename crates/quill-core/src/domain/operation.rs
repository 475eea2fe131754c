//! Sandboxed operation model: definitions, requests and results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use super::RequestId;

/// Arguments passed to an operation body.
pub type Args = serde_json::Map<String, serde_json::Value>;

/// How dangerous an operation is. The sandbox policy decides which levels may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    /// Always permitted.
    Safe,

    /// Needs `allow_restricted`.
    Restricted,

    /// Needs `allow_unsafe`.
    Unsafe,
}

impl fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyCategory::Safe => "safe",
            SafetyCategory::Restricted => "restricted",
            SafetyCategory::Unsafe => "unsafe",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    pub fn matches(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => !matches!(value, Value::Null),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
}

impl ParamSpec {
    pub fn required(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: true,
        }
    }

    pub fn optional(param_type: ParamType) -> Self {
        Self {
            param_type,
            required: false,
        }
    }
}

/// A named operation the sandbox can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub name: String,
    pub description: String,
    pub category: SafetyCategory,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamSpec>,

    /// Hard cap on a single invocation; requests may only shorten it.
    pub max_duration: Duration,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>, category: SafetyCategory, max_duration: Duration) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            parameters: BTreeMap::new(),
            max_duration,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    /// Check `args` against the parameter schema.
    ///
    /// Unknown arguments are accepted; only declared ones are checked.
    pub fn validate_args(&self, args: &Args) -> Result<(), String> {
        for (name, spec) in &self.parameters {
            match args.get(name) {
                None | Some(serde_json::Value::Null) if spec.required => {
                    return Err(format!("missing required parameter '{name}'"));
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) if !spec.param_type.matches(value) => {
                    return Err(format!(
                        "parameter '{name}' must be of type {:?}",
                        spec.param_type
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// One call into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub operation: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default)]
    pub caller_id: String,
    pub request_id: RequestId,

    /// Requested deadline. Capped by the definition's `max_duration`.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, args: Args) -> Self {
        Self {
            operation: operation.into(),
            args,
            caller_id: String::new(),
            request_id: RequestId::random(),
            timeout: None,
        }
    }

    pub fn with_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = caller_id.into();
        self
    }

    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub execution_time_seconds: f64,
    pub request_id: RequestId,
    pub caller_id: String,
}

impl OperationResult {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}
