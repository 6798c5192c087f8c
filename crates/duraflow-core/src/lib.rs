//! Durable execution engine for Duraflow.
//!
//! This crate defines the "ports" (the log store trait) that the
//! infrastructure layer implements, plus the engine itself: step executor,
//! workflow runner, timer service, and instance manager. It depends only on
//! `duraflow-types` -- never on `duraflow-infra` or any database/IO crate.

pub mod clock;
pub mod repository;
pub mod workflow;
