//! A fixed-capacity binary-buddy allocator.
//!
//! [`BuddyAllocator`] owns a single zero-initialized arena of `2^N` bytes and
//! hands out power-of-two blocks of it. Requests are rounded up to the next
//! power of two; larger free blocks are split in half until a block of the
//! right size exists, and freed blocks are merged with their buddy for as
//! long as the buddy is also free.
//!
//! ```
//! use buddy_arena::{AllocError, BuddyAllocator};
//!
//! // A 4 KiB arena.
//! let mut buddy = BuddyAllocator::try_new(12).unwrap();
//!
//! let block = buddy.allocate(5).unwrap();
//! assert_eq!(block.len(), 8);
//!
//! buddy.free(block.cast()).unwrap();
//! assert!(buddy.is_pristine());
//!
//! assert_eq!(
//!     buddy.allocate(8192),
//!     Err(AllocError::RequestExceedsCapacity { order: 13, max_order: 12 })
//! );
//! ```
//!
//! The allocator is single-threaded: every operation takes `&mut self` and
//! runs to completion. Wrap it in a lock to share it between threads.

#![doc(html_root_url = "https://docs.rs/buddy_arena/0.1.0")]
#![warn(missing_debug_implementations)]
#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]
#![no_std]

extern crate alloc;

mod arena;
mod bookkeeping;
pub mod buddy;
mod core;


use crate::core::{alloc::Layout, fmt};

pub use crate::buddy::BuddyAllocator;

/// The smallest supported arena order.
pub const MIN_ORDER: u32 = 1;

/// The largest supported arena order.
///
/// An allocator of this order manages 1 GiB.
pub const MAX_ORDER: u32 = 30;

/// The error type for allocator constructors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocInitError {
    /// The requested arena order is outside `MIN_ORDER..=MAX_ORDER`.
    InvalidCapacity {
        /// The rejected order.
        order: u32,
    },

    /// The arena could not be allocated.
    ///
    /// The variant contains the [`Layout`] that could not be allocated.
    AllocFailed(Layout),
}

impl fmt::Display for AllocInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocInitError::InvalidCapacity { order } => write!(
                f,
                "invalid arena order {order}: must be between {MIN_ORDER} and {MAX_ORDER}"
            ),
            AllocInitError::AllocFailed(layout) => write!(
                f,
                "failed to allocate arena of {} bytes (align {})",
                layout.size(),
                layout.align()
            ),
        }
    }
}

impl ::core::error::Error for AllocInitError {}

/// Indicates why an allocation request could not be satisfied.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// A zero-sized block was requested.
    InvalidArgument,

    /// The request rounds up to a block larger than the whole arena.
    ///
    /// Retrying cannot succeed without a larger arena.
    RequestExceedsCapacity {
        /// The order the request rounds up to.
        order: u32,
        /// The order of the arena.
        max_order: u32,
    },

    /// The requested alignment exceeds the alignment of the arena base.
    UnsupportedAlignment {
        /// The requested alignment.
        align: usize,
        /// The largest alignment the arena can guarantee.
        max_align: usize,
    },

    /// No free block is large enough.
    ///
    /// Retrying may succeed after other blocks are freed.
    OutOfMemory,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidArgument => f.write_str("cannot allocate a zero-sized block"),
            AllocError::RequestExceedsCapacity { order, max_order } => write!(
                f,
                "request of order {order} exceeds arena order {max_order}"
            ),
            AllocError::UnsupportedAlignment { align, max_align } => write!(
                f,
                "alignment {align} exceeds arena alignment {max_align}"
            ),
            AllocError::OutOfMemory => f.write_str("no free block is large enough"),
        }
    }
}

impl ::core::error::Error for AllocError {}

/// Indicates why a block could not be freed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FreeError {
    /// The address does not point into the arena.
    InvalidAddress,

    /// The address points into the arena but is not the start of a live
    /// allocation.
    DoubleFreeOrInvalidAddress,
}

impl fmt::Display for FreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreeError::InvalidAddress => f.write_str("address is outside the arena"),
            FreeError::DoubleFreeOrInvalidAddress => {
                f.write_str("address is not a live allocation")
            }
        }
    }
}

impl ::core::error::Error for FreeError {}
