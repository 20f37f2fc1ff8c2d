//! Small arithmetic helpers shared by the allocators.

pub mod layout;
pub mod size;
