//! Repository traits for metadata operations.

pub mod chunks;
pub mod files;

pub use chunks::ChunkRepo;
pub use files::{FileRepo, StateTransition};
