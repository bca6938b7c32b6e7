pub mod fixtures;
pub mod mocks;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, temp_chunk_store};
#[allow(unused_imports)]
pub use mocks::FailingBackend;
