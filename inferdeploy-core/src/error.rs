//! Error types for inferdeploy.
//!
//! Uses `thiserror` for structured error variants. Platform responses are
//! classified exactly once, into [`PlatformError`], by the adapter that talks
//! to the platform. The lifecycle, autoscaling and inference layers match on
//! those variants and never re-parse platform messages.

use std::fmt;

/// Top-level error type for the inferdeploy library.
#[derive(Debug, thiserror::Error)]
pub enum InferDeployError {
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Convenience result type for inferdeploy operations.
pub type Result<T> = std::result::Result<T, InferDeployError>;

/// The kind of platform resource an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Endpoint,
    EndpointConfig,
    Model,
    ScalableTarget,
    ScalingPolicy,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Endpoint => "endpoint",
            Self::EndpointConfig => "endpoint configuration",
            Self::Model => "model",
            Self::ScalableTarget => "scalable target",
            Self::ScalingPolicy => "scaling policy",
        };
        f.write_str(name)
    }
}

/// Normalized error returned by every [`crate::platform::PlatformClient`] call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("{resource} not found: {message}")]
    NotFound {
        resource: ResourceKind,
        message: String,
    },

    #[error("{resource} already exists: {message}")]
    AlreadyExists {
        resource: ResourceKind,
        message: String,
    },

    #[error("Throttled by platform: {message}")]
    Throttled {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Platform temporarily unavailable: {message}")]
    Unavailable { message: String },

    #[error("Invalid argument ({code}): {message}")]
    InvalidArgument { code: String, message: String },

    #[error("Platform fault ({code}): {message}")]
    Fault { code: String, message: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },
}

impl PlatformError {
    pub fn not_found(resource: ResourceKind, message: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            message: message.into(),
        }
    }

    pub fn fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fault {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Attach a server-provided retry delay to a throttling error.
    pub fn with_retry_after(self, secs: Option<u64>) -> Self {
        match self {
            Self::Throttled {
                message,
                retry_after_secs,
            } => Self::Throttled {
                message,
                retry_after_secs: retry_after_secs.or(secs),
            },
            other => other,
        }
    }

    /// Whether the failed call may succeed if issued again unchanged.
    ///
    /// Timeouts are not retried: a timed-out mutating call may already have
    /// been applied on the platform side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Unavailable { .. } | Self::Transport { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors from endpoint lifecycle and autoscaling operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Endpoint configuration not found: {name}")]
    ConfigNotFound { name: String },

    #[error("Endpoint not found: {name}")]
    EndpointNotFound { name: String },

    #[error("{operation} throttled after retries: {message}")]
    Throttled { operation: String, message: String },

    #[error("Invalid endpoint spec: {message}")]
    InvalidSpec { message: String },

    #[error("Precondition failed: {message}")]
    PreconditionFailed { message: String },

    #[error("{operation} failed: {message}")]
    PlatformFault { operation: String, message: String },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("{operation} interrupted: {message}")]
    Interrupted { operation: String, message: String },
}

impl LifecycleError {
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            message: message.into(),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Map a platform error raised while operating on `name`.
    pub fn from_platform(operation: &str, name: &str, err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound {
                resource: ResourceKind::Endpoint,
                ..
            } => Self::EndpointNotFound {
                name: name.to_string(),
            },
            PlatformError::NotFound {
                resource: ResourceKind::EndpointConfig | ResourceKind::Model,
                ..
            } => Self::ConfigNotFound {
                name: name.to_string(),
            },
            PlatformError::NotFound { resource, message } => Self::PlatformFault {
                operation: operation.to_string(),
                message: format!("{resource} not found: {message}"),
            },
            PlatformError::AlreadyExists { resource, message } => Self::PreconditionFailed {
                message: format!(
                    "{operation} on '{name}': {resource} already exists ({message}); \
                     another writer may be operating on this endpoint"
                ),
            },
            PlatformError::Throttled { message, .. } | PlatformError::Unavailable { message } => {
                Self::Throttled {
                    operation: operation.to_string(),
                    message,
                }
            }
            PlatformError::InvalidArgument { code, message } => Self::InvalidSpec {
                message: format!("{operation} rejected ({code}): {message}"),
            },
            PlatformError::Fault { code, message } => Self::PlatformFault {
                operation: operation.to_string(),
                message: format!("{code}: {message}"),
            },
            PlatformError::Transport { message } => Self::Interrupted {
                operation: operation.to_string(),
                message,
            },
            PlatformError::Timeout { timeout_secs, .. } => Self::Timeout {
                operation: operation.to_string(),
                timeout_secs,
            },
        }
    }

    /// Whether the failed call may still have taken effect on the platform.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Interrupted { .. })
    }

    /// Not-found outcomes that cleanup steps treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. } | Self::EndpointNotFound { .. }
        )
    }
}

/// Errors from a single inference call. They never affect endpoint lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InferenceError {
    #[error("Refusing to send an empty batch to {endpoint}")]
    EmptyBatch { endpoint: String },

    #[error("Serialization error for {endpoint}: {message}")]
    Serialization { endpoint: String, message: String },

    #[error("Inference on {endpoint} timed out after {timeout_secs}s")]
    Timeout { endpoint: String, timeout_secs: u64 },

    #[error("Endpoint {endpoint} is not deployed")]
    EndpointNotFound { endpoint: String },

    #[error("Inference on {endpoint} failed: {source}")]
    Platform {
        endpoint: String,
        #[source]
        source: PlatformError,
    },
}

impl InferenceError {
    pub fn from_platform(endpoint: &str, err: PlatformError) -> Self {
        match err {
            PlatformError::NotFound { .. } => Self::EndpointNotFound {
                endpoint: endpoint.to_string(),
            },
            PlatformError::Timeout { timeout_secs, .. } => Self::Timeout {
                endpoint: endpoint.to_string(),
                timeout_secs,
            },
            other => Self::Platform {
                endpoint: endpoint.to_string(),
                source: other,
            },
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
}
