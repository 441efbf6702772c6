//! Core domain types for the flowline platform.
//!
//! This crate provides the strongly-typed identifiers shared by every other
//! flowline crate.

pub mod id;

pub use id::{ExecutionId, ParseIdError, StepId, SubscriberId, WorkflowId};
