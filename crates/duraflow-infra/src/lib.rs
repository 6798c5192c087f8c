//! Infrastructure layer for Duraflow.
//!
//! Contains the SQLite implementation of the `LogStore` trait defined in
//! `duraflow-core`, backed by WAL-mode SQLite with split read/write pools.

pub mod sqlite;
