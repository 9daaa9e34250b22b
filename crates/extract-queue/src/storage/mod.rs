//! Storage module for durable checkpoint and status persistence
//!
//! Provides SQLite-based implementations of the collaborator ports.

mod database;

pub use database::SqliteStore;
