//! Allocation backends.
//!
//! The buddy allocator and its multi-heap pool are the core; the typed
//! front-ends wrap them per memory kind.

pub mod buddy;
pub mod default_buffer;
pub mod deferred;
pub mod multi;
pub mod pixel;
pub mod texture;
pub mod upload;
