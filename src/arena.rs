use crate::core::{
    alloc::Layout,
    fmt,
    num::NonZeroUsize,
    ptr::{NonNull, NonNullStrict},
    slice,
};

use crate::{AllocInitError, MAX_ORDER, MIN_ORDER};

/// The largest alignment requested for the arena base.
///
/// Arenas smaller than this are aligned to their own size.
pub const ARENA_ALIGN: usize = 4096;

/// Indicates that an offset or address does not fall inside the arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OutOfRange;

/// The region of memory managed by an allocator.
///
/// The arena owns a zero-initialized buffer of `2^order` bytes obtained from
/// the global allocator, and translates between arena-relative offsets and
/// addresses carrying the buffer's provenance.
pub struct Arena {
    ptr: NonNull<u8>,
    layout: Layout,
    order: u32,
}

impl Arena {
    /// Returns the layout of an arena of the given order.
    pub fn layout(order: u32) -> Result<Layout, AllocInitError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(AllocInitError::InvalidCapacity { order });
        }

        let size = 1_usize
            .checked_shl(order)
            .ok_or(AllocInitError::InvalidCapacity { order })?;
        let align = size.min(ARENA_ALIGN);

        Layout::from_size_align(size, align).map_err(|_| AllocInitError::InvalidCapacity { order })
    }

    /// Allocates a zeroed arena of `2^order` bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCapacity` if `order` is outside the supported range,
    /// or `AllocFailed` if the global allocator cannot provide the buffer.
    pub fn try_new(order: u32) -> Result<Arena, AllocInitError> {
        let layout = Self::layout(order)?;

        // SAFETY: `layout` has a nonzero size because `order >= MIN_ORDER`.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(AllocInitError::AllocFailed(layout))?;

        // Owned from here on, so the buffer is freed on every error path.
        let arena = Arena { ptr, layout, order };

        end_addr(arena.base_addr(), arena.size()).ok_or(AllocInitError::AllocFailed(layout))?;

        Ok(arena)
    }

    #[inline]
    pub fn order(&self) -> u32 {
        self.order
    }

    /// Returns the size of the arena in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Returns the alignment of the arena base.
    #[inline]
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    /// Returns the address of the arena base.
    #[inline]
    pub fn base_addr(&self) -> NonZeroUsize {
        NonNullStrict::addr(self.ptr)
    }

    /// Converts an arena offset to an address with the arena's provenance.
    #[inline]
    pub fn to_address(&self, offset: usize) -> Result<NonNull<u8>, OutOfRange> {
        if offset >= self.size() {
            return Err(OutOfRange);
        }

        let raw = self.base_addr().get().checked_add(offset).ok_or(OutOfRange)?;
        let addr = NonZeroUsize::new(raw).ok_or(OutOfRange)?;

        Ok(NonNullStrict::with_addr(self.ptr, addr))
    }

    /// Converts an address to an arena offset.
    #[inline]
    pub fn to_offset(&self, addr: NonNull<u8>) -> Result<usize, OutOfRange> {
        let offset = NonNullStrict::addr(addr)
            .get()
            .checked_sub(self.base_addr().get())
            .ok_or(OutOfRange)?;

        if offset >= self.size() {
            return Err(OutOfRange);
        }

        Ok(offset)
    }

    /// Returns a slice pointer to `len` bytes starting at `offset`.
    ///
    /// The returned pointer has the provenance of the arena.
    #[inline]
    pub fn with_offset_and_size(&self, offset: usize, len: usize) -> NonNull<[u8]> {
        debug_assert!(offset.checked_add(len).map_or(false, |end| end <= self.size()));

        // Cannot saturate: the end of the arena is representable.
        let start = NonNullStrict::with_addr(self.ptr, self.base_addr().saturating_add(offset));

        NonNull::slice_from_raw_parts(start, len)
    }

    /// Returns the bytes of `len` bytes starting at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie inside the arena, and no mutable reference to any
    /// part of it may exist for the lifetime of the returned slice.
    #[inline]
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.size());

        unsafe { slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// Returns the bytes of `len` bytes starting at `offset` mutably.
    ///
    /// # Safety
    ///
    /// The range must lie inside the arena, and no other reference to any
    /// part of it may exist for the lifetime of the returned slice.
    #[inline]
    pub unsafe fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.size());

        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }
}

/// Returns the one-past-the-end address of `size` bytes at `base`, or `None`
/// if it is not representable.
#[inline]
fn end_addr(base: NonZeroUsize, size: usize) -> Option<usize> {
    base.get().checked_add(size)
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `ptr` was allocated by the global allocator with `layout`.
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.ptr)
            .field("size", &self.size())
            .field("align", &self.align())
            .finish()
    }
}
