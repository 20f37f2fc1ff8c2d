//! Descriptor (view handle) tables.
//!
//! [`DescriptorSlots`] hands out long-lived slots in fixed-capacity,
//! CPU-only tables. [`DescriptorCache`] stages transient descriptors in
//! shader-visible tables that are rewound once per retired frame.

pub mod cache;
pub mod slots;

pub use cache::{CachedDescriptors, DescriptorCache};
pub use slots::{DescriptorSlotAllocator, DescriptorSlots, SlotHandle};
