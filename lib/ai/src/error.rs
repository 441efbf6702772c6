//! Error types for the AI crate.

use std::fmt;

/// Errors from prediction model operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionError {
    /// The model could not produce a decision.
    ///
    /// Callers treat this as equivalent to a below-threshold confidence and
    /// fall back rather than failing.
    Unavailable { model: String, reason: String },
    /// The requested model is not known to the backend.
    UnknownModel { model: String },
    /// A named input was missing from the supplied values.
    MissingInput { model: String, input: String },
}

impl fmt::Display for PredictionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { model, reason } => {
                write!(f, "prediction model '{model}' unavailable: {reason}")
            }
            Self::UnknownModel { model } => {
                write!(f, "unknown prediction model: {model}")
            }
            Self::MissingInput { model, input } => {
                write!(f, "prediction model '{model}' missing input '{input}'")
            }
        }
    }
}

impl std::error::Error for PredictionError {}
