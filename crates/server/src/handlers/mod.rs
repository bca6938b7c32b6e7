//! HTTP request handlers.

pub mod chunks;
pub mod events;
pub mod files;
pub mod health;

pub use chunks::*;
pub use events::*;
pub use files::*;
pub use health::*;
