//! Binary-buddy allocation.
//!
//! A binary-buddy allocator hands out blocks whose sizes are powers of two.
//! A block of order `k` spans `2^k` bytes and starts at an offset that is a
//! multiple of `2^k`; its *buddy* is the other half of the order `k + 1`
//! block it was split from, found by flipping bit `k` of its offset.
//!
//! Allocation rounds the request up to the nearest order and takes the
//! lowest-addressed free block of that order. If there is none, the
//! lowest-addressed free block of the smallest larger order is split in half
//! repeatedly, keeping the lower half and releasing the upper half, until a
//! block of the requested order remains.
//!
//! Freeing a block merges it with its buddy for as long as the buddy is
//! free, so the arena always returns to a single free block once every
//! allocation is released.
//!
//! ## Characteristics
//!
//! #### Time complexity
//!
//! With `N` the arena order and `M` the number of tracked blocks:
//!
//! | Operation                | Best-case    | Worst-case       |
//! |--------------------------|--------------|------------------|
//! | Allocate                 | O(log M)     | O(N log M)       |
//! | Free                     | O(log M)     | O(N log M)       |
//!
//! #### Fragmentation
//!
//! Blocks are rounded up to a power of two, so a request may waste up to
//! half of its block to internal fragmentation. External fragmentation is
//! reduced by always serving the lowest-addressed free block first.

use alloc::vec::Vec;

use crate::{
    arena::Arena,
    bookkeeping::Bookkeeping,
    core::{alloc::Layout, fmt, num::UsizeExt, ptr::NonNull},
    AllocError, AllocInitError, FreeError,
};

/// The `log` target for allocator diagnostics.
const LOG_TARGET: &str = "buddy_arena";

/// A binary-buddy allocator over a single owned arena.
///
/// The arena holds `2^N` bytes, where `N` is the order passed to
/// [`try_new`](BuddyAllocator::try_new). Order 0 is the smallest allocatable
/// unit of one byte, and order `N` is the whole arena.
///
/// ```
/// use buddy_arena::BuddyAllocator;
///
/// let mut buddy = BuddyAllocator::try_new(4).unwrap();
///
/// let a = buddy.allocate(1).unwrap();
/// let b = buddy.allocate(1).unwrap();
///
/// // Both blocks were split from the same order 1 block.
/// assert_eq!(buddy.block_order(a.cast()), Some(0));
/// assert_eq!(b.cast::<u8>().as_ptr() as usize - a.cast::<u8>().as_ptr() as usize, 1);
///
/// buddy.free(a.cast()).unwrap();
/// buddy.free(b.cast()).unwrap();
/// assert!(buddy.is_pristine());
/// ```
pub struct BuddyAllocator {
    arena: Arena,
    books: Bookkeeping,
}

// SAFETY: The allocator exclusively owns its arena. The raw base pointer is
// never shared with another allocator, and every operation requires `&mut
// self`, so moving the allocator to another thread cannot introduce a data
// race on allocator state.
unsafe impl Send for BuddyAllocator {}

impl BuddyAllocator {
    /// Constructs a new `BuddyAllocator` managing a zeroed arena of `2^order`
    /// bytes obtained from the global allocator.
    ///
    /// # Errors
    ///
    /// Returns [`AllocInitError::InvalidCapacity`] if `order` is outside
    /// [`MIN_ORDER`]`..=`[`MAX_ORDER`], and [`AllocInitError::AllocFailed`]
    /// if the arena could not be allocated.
    ///
    /// [`MIN_ORDER`]: crate::MIN_ORDER
    /// [`MAX_ORDER`]: crate::MAX_ORDER
    pub fn try_new(order: u32) -> Result<BuddyAllocator, AllocInitError> {
        let arena = Arena::try_new(order)?;
        let books = Bookkeeping::new(order);

        log::debug!(
            target: LOG_TARGET,
            "created arena of order {order} ({} bytes) at {:#x}",
            arena.size(),
            arena.base_addr()
        );

        Ok(BuddyAllocator { arena, books })
    }

    /// Returns the order of the arena.
    #[inline]
    pub fn max_order(&self) -> u32 {
        self.arena.order()
    }

    /// Returns the size of the arena in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.arena.size()
    }

    /// Returns the alignment guaranteed for the arena base.
    ///
    /// A block of order `k` is aligned to `min(2^k, max_align())`.
    #[inline]
    pub fn max_align(&self) -> usize {
        self.arena.align()
    }

    /// Returns the order of the smallest block that can hold `num_bytes`.
    ///
    /// Returns `None` if `num_bytes` is zero.
    ///
    /// ```
    /// use buddy_arena::BuddyAllocator;
    ///
    /// assert_eq!(BuddyAllocator::order_for(0), None);
    /// assert_eq!(BuddyAllocator::order_for(1), Some(0));
    /// assert_eq!(BuddyAllocator::order_for(4), Some(2));
    /// assert_eq!(BuddyAllocator::order_for(5), Some(3));
    /// ```
    #[inline]
    pub fn order_for(num_bytes: usize) -> Option<u32> {
        num_bytes.ceil_log2()
    }

    /// Attempts to allocate a block of at least `num_bytes` bytes.
    ///
    /// On success, returns a [`NonNull<[u8]>`] spanning the whole block, so
    /// its length is the size of the block rather than `num_bytes`. The
    /// pointer remains valid until it is passed to [`free`], [`free_all`] is
    /// called, or the allocator is dropped.
    ///
    /// The contents of the block are those left by its previous user, or zero
    /// if it was never allocated.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidArgument`] if `num_bytes` is zero.
    /// - [`AllocError::RequestExceedsCapacity`] if the request is larger than
    ///   the arena.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough.
    ///
    /// The allocator is unchanged when an error is returned.
    ///
    /// [`NonNull<[u8]>`]: NonNull
    /// [`free`]: BuddyAllocator::free
    /// [`free_all`]: BuddyAllocator::free_all
    pub fn allocate(&mut self, num_bytes: usize) -> Result<NonNull<[u8]>, AllocError> {
        let order = Self::order_for(num_bytes).ok_or_else(|| {
            log::debug!(target: LOG_TARGET, "rejected zero-sized allocation");
            AllocError::InvalidArgument
        })?;

        self.allocate_order(order)
    }

    /// Attempts to allocate a block that satisfies `layout`.
    ///
    /// This behaves like [`allocate`](BuddyAllocator::allocate), except that
    /// the block is also at least as large as `layout.align()`, which makes
    /// its address aligned to `layout.align()`.
    ///
    /// # Errors
    ///
    /// In addition to the errors returned by `allocate`, returns
    /// [`AllocError::UnsupportedAlignment`] if `layout.align()` exceeds
    /// [`max_align`](BuddyAllocator::max_align).
    pub fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        let max_align = self.max_align();
        if layout.align() > max_align {
            log::debug!(
                target: LOG_TARGET,
                "rejected alignment {} above arena alignment {max_align}",
                layout.align()
            );
            return Err(AllocError::UnsupportedAlignment {
                align: layout.align(),
                max_align,
            });
        }

        let size_order = Self::order_for(layout.size()).ok_or(AllocError::InvalidArgument)?;
        let align_order = layout.align().ilog2();

        self.allocate_order(size_order.max(align_order))
    }

    fn allocate_order(&mut self, target_order: u32) -> Result<NonNull<[u8]>, AllocError> {
        let max_order = self.max_order();
        if target_order > max_order {
            log::debug!(
                target: LOG_TARGET,
                "rejected request of order {target_order} from arena of order {max_order}"
            );
            return Err(AllocError::RequestExceedsCapacity {
                order: target_order,
                max_order,
            });
        }

        let offset = match self.books.take_smallest_free(target_order) {
            Some(ofs) => ofs,
            None => self.split_down_to(target_order)?,
        };

        self.books.mark_used(target_order, offset);

        log::trace!(
            target: LOG_TARGET,
            "allocated block {offset:#x} of order {target_order}"
        );

        Ok(self.arena.with_offset_and_size(offset, 1 << target_order))
    }

    /// Splits the lowest-addressed free block of the smallest order above
    /// `target_order` until a block of `target_order` is obtained.
    ///
    /// The returned block is not in any free set. Fails without modifying
    /// any free set if no larger block is free.
    fn split_down_to(&mut self, target_order: u32) -> Result<usize, AllocError> {
        let max_order = self.max_order();

        let Some(init_order) =
            (target_order + 1..=max_order).find(|&order| self.books.has_free(order))
        else {
            log::debug!(
                target: LOG_TARGET,
                "out of memory for block of order {target_order}"
            );
            return Err(AllocError::OutOfMemory);
        };

        let offset = self
            .books
            .take_smallest_free(init_order)
            .ok_or(AllocError::OutOfMemory)?;

        // The lower half keeps the block's offset; the upper half becomes
        // free at the next order down.
        for order in (target_order..init_order).rev() {
            let upper_half = offset + (1 << order);
            self.books.mark_free(order, upper_half);

            log::trace!(
                target: LOG_TARGET,
                "split block {offset:#x} of order {} into {offset:#x} and {upper_half:#x}",
                order + 1
            );
        }

        Ok(offset)
    }

    /// Frees the block at `ptr`.
    ///
    /// The block is merged with its buddy, and the result with its own buddy,
    /// for as long as the buddy is free.
    ///
    /// # Errors
    ///
    /// - [`FreeError::InvalidAddress`] if `ptr` does not point into the arena.
    /// - [`FreeError::DoubleFreeOrInvalidAddress`] if `ptr` points into the
    ///   arena but is not the start of a live allocation.
    ///
    /// The allocator is unchanged when an error is returned.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), FreeError> {
        let offset = self.arena.to_offset(ptr).map_err(|_| {
            log::debug!(target: LOG_TARGET, "rejected free of foreign address {ptr:p}");
            FreeError::InvalidAddress
        })?;

        let order = self.books.unmark_used(offset).ok_or_else(|| {
            log::debug!(
                target: LOG_TARGET,
                "rejected free of {offset:#x}: not a live allocation"
            );
            FreeError::DoubleFreeOrInvalidAddress
        })?;

        log::trace!(target: LOG_TARGET, "freed block {offset:#x} of order {order}");

        self.coalesce(order, offset);

        Ok(())
    }

    /// Merges the free block `(order, offset)` with its buddies and inserts
    /// the resulting maximal block into the free sets.
    fn coalesce(&mut self, mut order: u32, mut offset: usize) {
        let max_order = self.max_order();

        while order < max_order {
            let buddy = offset ^ (1 << order);
            if !self.books.remove_free(order, buddy) {
                break;
            }

            let merged = offset.min(buddy);

            log::trace!(
                target: LOG_TARGET,
                "coalesced {offset:#x} and {buddy:#x} into {merged:#x} of order {}",
                order + 1
            );

            offset = merged;
            order += 1;
        }

        self.books.mark_free(order, offset);
    }

    /// Frees every live allocation, returning the allocator to its initial
    /// state.
    ///
    /// Every pointer previously returned by this allocator is invalidated.
    pub fn free_all(&mut self) {
        log::trace!(
            target: LOG_TARGET,
            "freeing all {} live blocks",
            self.books.num_used()
        );

        self.books.reset();
    }

    /// Returns the order of the live allocation starting at `ptr`.
    pub fn block_order(&self, ptr: NonNull<u8>) -> Option<u32> {
        let offset = self.arena.to_offset(ptr).ok()?;
        self.books.used_order(offset)
    }

    /// Returns the contents of the live allocation starting at `ptr`.
    ///
    /// Returns `None` if `ptr` is not the start of a live allocation.
    pub fn block(&self, ptr: NonNull<u8>) -> Option<&[u8]> {
        let offset = self.arena.to_offset(ptr).ok()?;
        let order = self.books.used_order(offset)?;

        // SAFETY: The block is tracked, so it lies inside the arena, and
        // `self` is borrowed immutably for the lifetime of the slice.
        Some(unsafe { self.arena.bytes(offset, 1 << order) })
    }

    /// Returns the contents of the live allocation starting at `ptr`
    /// mutably.
    ///
    /// Returns `None` if `ptr` is not the start of a live allocation.
    pub fn block_mut(&mut self, ptr: NonNull<u8>) -> Option<&mut [u8]> {
        let offset = self.arena.to_offset(ptr).ok()?;
        let order = self.books.used_order(offset)?;

        // SAFETY: The block is tracked, so it lies inside the arena, and
        // `self` is borrowed mutably for the lifetime of the slice.
        Some(unsafe { self.arena.bytes_mut(offset, 1 << order) })
    }

    /// Converts an arena offset, such as one yielded by
    /// [`free_blocks`](BuddyAllocator::free_blocks), to an address.
    ///
    /// Returns `None` if `offset` is not inside the arena.
    pub fn address_of(&self, offset: usize) -> Option<NonNull<u8>> {
        self.arena.to_address(offset).ok()
    }

    /// Converts an address to an arena offset.
    ///
    /// Returns `None` if `ptr` does not point into the arena.
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.arena.to_offset(ptr).ok()
    }

    /// Returns the offsets of the free blocks of `order`, in ascending order.
    ///
    /// The iterator is empty if `order` exceeds
    /// [`max_order`](BuddyAllocator::max_order).
    pub fn free_blocks(&self, order: u32) -> impl Iterator<Item = usize> + '_ {
        let order = (order <= self.max_order()).then_some(order);
        order
            .into_iter()
            .flat_map(move |order| self.books.free_offsets(order))
    }

    /// Returns the live allocations as `(offset, order)` pairs in ascending
    /// offset order.
    pub fn live_blocks(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.books.used_blocks()
    }

    /// Returns the number of bytes held by live allocations, counting each
    /// block at its full size.
    pub fn allocated_bytes(&self) -> usize {
        self.books.used_bytes()
    }

    /// Returns the number of bytes not held by live allocations.
    pub fn free_bytes(&self) -> usize {
        self.capacity() - self.allocated_bytes()
    }

    /// Returns `true` if there are no live allocations and the arena is a
    /// single free block.
    pub fn is_pristine(&self) -> bool {
        self.books.is_pristine()
    }

    /// Returns the size of the largest block that can currently be
    /// allocated, or `None` if the arena is full.
    pub fn largest_free_block(&self) -> Option<usize> {
        (0..=self.max_order())
            .rev()
            .find(|&order| self.books.has_free(order))
            .map(|order| 1 << order)
    }

    /// Returns the number of free blocks of each order, indexed by order.
    pub fn free_histogram(&self) -> Vec<usize> {
        (0..=self.max_order())
            .map(|order| self.books.free_offsets(order).count())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        self.books.assert_invariants();
    }
}

impl fmt::Debug for BuddyAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("arena", &self.arena)
            .field("blocks", &self.books)
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}
