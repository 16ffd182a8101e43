use std::time::Duration;
use thiserror::Error;

/// Unified error type for the flow engine.
///
/// Every variant carries the expression, path or node that failed so the
/// message alone is enough for a user to locate the problem.
#[derive(Debug, Clone, Error)]
pub enum FlowError {
    /// Malformed flow, missing required edge, invalid node configuration
    #[error("configuration error: {message}")]
    Configuration {
        message: String,
        node: Option<String>,
    },

    /// Path lookup in the variable map failed
    #[error("variable '{path}' not found (available: {})", .available.join(", "))]
    PathNotFound {
        path: String,
        available: Vec<String>,
    },

    /// `#env:NAME` reference to an unset environment variable
    #[error("environment variable '{name}' is not set")]
    EnvReference { name: String },

    /// `#file:/path` reference that could not be read
    #[error("failed to read file '{path}': {message}")]
    FileReference { path: String, message: String },

    /// Cloud secret reference that could not be resolved
    #[error("failed to resolve secret '{reference}' from {provider}: {message}")]
    SecretReference {
        provider: String,
        reference: String,
        message: String,
    },

    /// Compile or runtime failure of an expression
    #[error("expression error in '{expression}': {message}")]
    Expression { expression: String, message: String },

    /// One or more user assertions evaluated to false
    #[error("assertion failed: {}", .failed.join("; "))]
    Assertion { failed: Vec<String> },

    /// The LLM provider call failed
    #[error("agent error: {message}")]
    Provider { message: String },

    /// A peer node invoked as a tool failed
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Cooperative cancellation observed
    #[error("canceled: {operation}")]
    Canceled { operation: String },

    /// Raised by a user-authored throw node
    #[error("flow canceled by throw: {message}")]
    CanceledByThrow { message: String },

    /// Deadline exceeded
    #[error("operation timed out: {operation} (timeout: {}ms)", .timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    /// Node-specific execution failure
    #[error("node '{node}' failed: {message}")]
    Execution { node: String, message: String },

    #[error("serialization failed: {message}")]
    Serialization { message: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl FlowError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            node: None,
        }
    }

    pub fn node_configuration<N: Into<String>, S: Into<String>>(node: N, message: S) -> Self {
        let node = node.into();
        Self::Configuration {
            message: format!("{}: {}", node, message.into()),
            node: Some(node),
        }
    }

    pub fn path_not_found<S: Into<String>>(path: S, available: Vec<String>) -> Self {
        Self::PathNotFound {
            path: path.into(),
            available,
        }
    }

    pub fn expression<E: Into<String>, M: Into<String>>(expression: E, message: M) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    pub fn provider<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    pub fn tool<T: Into<String>, M: Into<String>>(tool: T, message: M) -> Self {
        Self::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn canceled<S: Into<String>>(operation: S) -> Self {
        Self::Canceled {
            operation: operation.into(),
        }
    }

    pub fn thrown<S: Into<String>>(message: S) -> Self {
        Self::CanceledByThrow {
            message: message.into(),
        }
    }

    pub fn timeout<S: Into<String>>(operation: S, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn execution<N: Into<String>, M: Into<String>>(node: N, message: M) -> Self {
        Self::Execution {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for the errors that end a node as `Canceled` instead of `Failure`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Canceled { .. } | Self::CanceledByThrow { .. })
    }

    pub fn is_thrown(&self) -> bool {
        matches!(self, Self::CanceledByThrow { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Get error category for logging and status payloads
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::PathNotFound { .. }
            | Self::EnvReference { .. }
            | Self::FileReference { .. }
            | Self::SecretReference { .. } => "resolve",
            Self::Expression { .. } => "expression",
            Self::Assertion { .. } => "assertion",
            Self::Provider { .. } => "provider",
            Self::ToolExecution { .. } => "tool",
            Self::Canceled { .. } | Self::CanceledByThrow { .. } => "cancellation",
            Self::Timeout { .. } => "timeout",
            Self::Execution { .. } => "execution",
            Self::Serialization { .. } => "serialization",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<serde_json::Error> for FlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for FlowError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for FlowError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<FlowError>() {
            Ok(flow) => flow,
            Err(other) => Self::Internal {
                message: format!("{:#}", other),
            },
        }
    }
}

/// Macro for creating errors tersely
#[macro_export]
macro_rules! flow_error {
    (configuration, $message:expr) => {
        $crate::core::errors::FlowError::configuration($message)
    };
    (configuration, $node:expr, $message:expr) => {
        $crate::core::errors::FlowError::node_configuration($node, $message)
    };
    (expression, $expression:expr, $message:expr) => {
        $crate::core::errors::FlowError::expression($expression, $message)
    };
    (execution, $node:expr, $message:expr) => {
        $crate::core::errors::FlowError::execution($node, $message)
    };
    (timeout, $operation:expr, $timeout:expr) => {
        $crate::core::errors::FlowError::timeout($operation, $timeout)
    };
}
