//! Error types for the provisioning engine
//!
//! Errors fall into two groups. Fatal errors (bad configuration, runaway
//! instance counts) abort a whole run. Everything else is reported to the
//! caller of the failing step, which logs it and moves on to the next sibling.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabforgeError {
    // Configuration Errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    #[error("{count} instances of {kind} '{object}' exceeds the configured error threshold of {limit}")]
    ThresholdExceeded {
        kind: String,
        object: String,
        count: u64,
        limit: u64,
    },

    #[error("Invalid specification at '{path}': {message}")]
    InvalidSpec { path: String, message: String },

    // Network Errors
    #[error("Could not determine the type of network '{network}'")]
    UnknownNetwork { network: String },

    #[error("Generic network '{network}' requires an instance index")]
    MissingInstanceIndex { network: String },

    #[error("Network '{network}' has unsupported type '{category}'")]
    UnsupportedNetworkType { network: String, category: String },

    // Hypervisor Errors
    #[error("VM operation '{operation}' failed: {details}")]
    VmOperationFailed { operation: String, details: String },

    #[error("Master '{vm}' did not convert to a template")]
    VerificationFailed { vm: String },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Already exists: {resource}")]
    AlreadyExists { resource: String },

    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    #[error("Unsupported: {feature}")]
    Unsupported { feature: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    // Conversions
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

pub type LabforgeResult<T> = std::result::Result<T, LabforgeError>;

impl LabforgeError {
    /// Create a configuration error with component and message
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        LabforgeError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid specification error for a dotted spec path
    pub fn invalid_spec(path: impl Into<String>, message: impl Into<String>) -> Self {
        LabforgeError::InvalidSpec {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn vm_operation(operation: impl Into<String>, details: impl Into<String>) -> Self {
        LabforgeError::VmOperationFailed {
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        LabforgeError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        LabforgeError::AlreadyExists {
            resource: resource.into(),
        }
    }

    /// Whether this error aborts the entire provisioning run.
    ///
    /// Only configuration problems and threshold violations are fatal; all
    /// other failures are confined to the node that produced them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LabforgeError::ConfigurationError { .. } | LabforgeError::ThresholdExceeded { .. }
        )
    }
}

impl From<tokio::time::error::Elapsed> for LabforgeError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LabforgeError::Timeout {
            operation: "provisioning run".to_string(),
        }
    }
}
