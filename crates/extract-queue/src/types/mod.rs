//! Core types shared by the queue, the storage collaborators and recovery

pub mod checkpoint;
pub mod document;

pub use checkpoint::{MergedDocument, PageCheckpoint};
pub use document::{DocumentKey, DocumentStatus, StatusEntry};
