//! Public API for gpuheap.
//!
//! This module contains the allocator context and the types it hands out.
//! Most users should only interact with types from this module.

pub mod config;
pub mod error;
pub mod location;
pub mod memory;
pub mod stats;
