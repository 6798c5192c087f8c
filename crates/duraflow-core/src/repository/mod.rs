//! Storage ports for the durable execution engine.

pub mod log;
pub mod memory;

pub use log::LogStore;
pub use memory::MemoryLogStore;
