//! AI prediction capability for the flowline platform.
//!
//! This crate provides the capability seam between the workflow engine and
//! whatever machine-learning backend produces decisions:
//!
//! - **Prediction**: a labeled outcome plus a confidence score
//! - **PredictionModel**: the trait the engine calls for AI decisions,
//!   AI-evaluated conditions, and prediction triggers
//! - **TablePredictionModel**: a deterministic in-memory backend for default
//!   wiring and tests

pub mod error;
pub mod model;

pub use error::PredictionError;
pub use model::{Prediction, PredictionModel, TablePredictionModel};
