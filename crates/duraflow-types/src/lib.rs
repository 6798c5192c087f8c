//! Shared domain types for Duraflow.
//!
//! This crate contains the core domain types used across the Duraflow engine:
//! Instance, StepRecord, RetryPolicy, Timer, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod duration;
pub mod error;
pub mod instance;
pub mod step;
