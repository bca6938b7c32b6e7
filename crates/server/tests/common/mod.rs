//! Common test utilities and fixtures.

pub mod finalizers;
pub mod fixtures;
pub mod metadata;
pub mod server;

#[allow(unused_imports)]
pub use finalizers::*;
#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use metadata::*;
#[allow(unused_imports)]
pub use server::*;
