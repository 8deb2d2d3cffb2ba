//! Error surface of the realm pipeline.
//!
//! Each variant carries a stable code (`FE-REALM-000N`) that is also stamped
//! on the structured event emitted for the failure.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::object_model::ObjectError;
use crate::source_filter::SourceRejection;

/// Names of the native error constructors a host provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorName {
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    #[serde(rename = "URIError")]
    UriError,
}

impl ErrorName {
    pub const ALL: [ErrorName; 7] = [
        Self::Error,
        Self::EvalError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
        Self::TypeError,
        Self::UriError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::EvalError => "EvalError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
            Self::SyntaxError => "SyntaxError",
            Self::TypeError => "TypeError",
            Self::UriError => "URIError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == name)
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exception thrown by evaluated code, rebuilt on the caller's side of the
/// host boundary. Holds no heap handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct EvaluationError {
    pub name: ErrorName,
    pub message: String,
}

impl EvaluationError {
    pub fn new(name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RealmError {
    #[error("unexpected host shape: {detail}")]
    HostShape { detail: String },
    #[error(transparent)]
    RejectedSource(#[from] SourceRejection),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error("transform `{pass}` failed: {message}")]
    Transform { pass: String, message: String },
    #[error("object model: {0}")]
    Object(#[from] ObjectError),
}

impl RealmError {
    pub fn host_shape(detail: impl Into<String>) -> Self {
        Self::HostShape {
            detail: detail.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::HostShape { .. } => "FE-REALM-0001",
            Self::RejectedSource(_) => "FE-REALM-0002",
            Self::Evaluation(_) => "FE-REALM-0003",
            Self::Transform { .. } => "FE-REALM-0004",
            Self::Object(_) => "FE-REALM-0005",
        }
    }

    /// The thrown error's constructor name, for evaluation failures.
    pub fn evaluation_name(&self) -> Option<ErrorName> {
        match self {
            Self::Evaluation(err) => Some(err.name),
            _ => None,
        }
    }
}
