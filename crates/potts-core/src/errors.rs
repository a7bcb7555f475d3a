//! Structured error types shared across the Potts crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`PottsError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (sizes, paths, worker indices, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for coupling inference.
///
/// None of the families are retried automatically: every error terminates the
/// operation that raised it and is reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum PottsError {
    /// Invalid or inconsistent configuration, raised before any sampling.
    #[error("configuration error: {0}")]
    Config(ErrorInfo),
    /// Effective sample size collapsed during a Newton step.
    #[error("divergence: {0}")]
    Divergence(ErrorInfo),
    /// Sequence counts or buffer sizes disagree with the worker layout.
    #[error("consistency error: {0}")]
    Consistency(ErrorInfo),
    /// A compute worker rejected an operation.
    #[error("worker error: {0}")]
    Worker(ErrorInfo),
    /// Serialization, schema and filesystem errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl PottsError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            PottsError::Config(info)
            | PottsError::Divergence(info)
            | PottsError::Consistency(info)
            | PottsError::Worker(info)
            | PottsError::Serde(info) => info,
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        PottsError::Config(ErrorInfo::new(code, message))
    }

    /// Wraps an I/O failure on `path`.
    pub fn io(code: &str, err: std::io::Error, path: &std::path::Path) -> Self {
        PottsError::Serde(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display()),
        )
    }

    /// Returns true for the divergence family.
    pub fn is_divergence(&self) -> bool {
        matches!(self, PottsError::Divergence(_))
    }
}
