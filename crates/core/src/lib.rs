//! Core domain types and shared logic for the tessera ingestion service.
//!
//! This crate defines the data model used across all other crates:
//! - Content hashing and digest-derived object keys
//! - Chunk identity and payload verification
//! - File records and the file lifecycle state machine
//! - Configuration shared by the server and its stores

pub mod chunk;
pub mod config;
pub mod error;
pub mod file;
pub mod hash;

pub use chunk::{Chunk, ChunkHash, ChunkId};
pub use error::{Error, Result};
pub use file::{File, FileHash, FileId, FileState, RegisterFile};
pub use hash::{ContentHash, ContentHasher};

/// Default maximum chunk size: 5 MiB
pub const MAX_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
