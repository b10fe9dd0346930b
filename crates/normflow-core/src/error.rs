use crate::backend::BackendStatus;
use crate::DType;
use thiserror::Error;

/// Errors raised by normflow operators, descriptors and the device layer.
///
/// Every variant carries the name of the operation that failed. None of these
/// are transient: they describe a configuration or programming defect
/// upstream, so callers are expected to abort the current operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("Invalid argument in operation '{operation}': {reason}")]
    InvalidArgument { operation: String, reason: String },

    #[error("Unsupported element type {dtype} in operation '{operation}'")]
    UnsupportedDType { operation: String, dtype: DType },

    #[error("Invalid shape in operation '{operation}': {reason}")]
    InvalidShape {
        operation: String,
        reason: String,
        shape: Option<Vec<usize>>,
    },

    #[error("Shape mismatch in operation '{operation}': expected {expected}, got {got}")]
    ShapeMismatch {
        operation: String,
        expected: String,
        got: String,
    },

    #[error("Incompatible devices in operation '{operation}': {device1} and {device2}")]
    DeviceMismatch {
        operation: String,
        device1: String,
        device2: String,
    },

    #[error("Backend call '{operation}' failed with status {status}: {details}")]
    Backend {
        operation: String,
        status: BackendStatus,
        details: String,
    },

    #[error("Operation '{operation}' not registered: {details}")]
    NotRegistered { operation: String, details: String },
}

impl TensorError {
    /// Create an invalid argument error with operation context
    pub fn invalid_argument(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_dtype(operation: &str, dtype: DType) -> Self {
        Self::UnsupportedDType {
            operation: operation.to_string(),
            dtype,
        }
    }

    /// Create an invalid shape error, keeping the offending dims around
    pub fn invalid_shape(operation: &str, reason: impl Into<String>, shape: &[usize]) -> Self {
        Self::InvalidShape {
            operation: operation.to_string(),
            reason: reason.into(),
            shape: Some(shape.to_vec()),
        }
    }

    pub fn shape_mismatch(operation: &str, expected: &str, got: &str) -> Self {
        Self::ShapeMismatch {
            operation: operation.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub fn device_mismatch(operation: &str, device1: &str, device2: &str) -> Self {
        Self::DeviceMismatch {
            operation: operation.to_string(),
            device1: device1.to_string(),
            device2: device2.to_string(),
        }
    }

    /// Create a backend failure from a non-success status code
    pub fn backend(operation: &str, status: BackendStatus, details: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            status,
            details: details.into(),
        }
    }

    pub fn not_registered(operation: &str, details: impl Into<String>) -> Self {
        Self::NotRegistered {
            operation: operation.to_string(),
            details: details.into(),
        }
    }

    /// Get the operation name for this error
    pub fn operation(&self) -> &str {
        match self {
            Self::InvalidArgument { operation, .. } => operation,
            Self::UnsupportedDType { operation, .. } => operation,
            Self::InvalidShape { operation, .. } => operation,
            Self::ShapeMismatch { operation, .. } => operation,
            Self::DeviceMismatch { operation, .. } => operation,
            Self::Backend { operation, .. } => operation,
            Self::NotRegistered { operation, .. } => operation,
        }
    }

    /// Backend status attached to this error, if it came from a backend call
    pub fn backend_status(&self) -> Option<BackendStatus> {
        match self {
            Self::Backend { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error reports invalid operator configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

pub type Result<T> = std::result::Result<T, TensorError>;

impl<T> From<std::sync::PoisonError<T>> for TensorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Backend {
            operation: "lock".to_string(),
            status: BackendStatus::InternalError,
            details: format!("poisoned lock: {err}"),
        }
    }
}
