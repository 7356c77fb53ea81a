//! Re-exports of `core`, plus stable polyfills.
//!
//! The strict-provenance shims in this module mirror the standard library
//! methods of the same names so that the allocator can be written against a
//! single API whether or not the `sptr` feature is enabled.

pub use core::{alloc, fmt, slice};

pub mod num {
    pub use core::num::*;

    pub trait UsizeExt {
        /// Returns the smallest `k` such that `2^k >= self`, or `None` if
        /// `self` is zero.
        fn ceil_log2(self) -> Option<u32>;
    }

    impl UsizeExt for usize {
        #[inline]
        fn ceil_log2(self) -> Option<u32> {
            match self {
                0 => None,
                1 => Some(0),
                x => Some((x - 1).ilog2() + 1),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn ceil_log2_rounds_up() {
            assert_eq!(0usize.ceil_log2(), None);
            assert_eq!(1usize.ceil_log2(), Some(0));
            assert_eq!(2usize.ceil_log2(), Some(1));
            assert_eq!(3usize.ceil_log2(), Some(2));
            assert_eq!(4usize.ceil_log2(), Some(2));
            assert_eq!(5usize.ceil_log2(), Some(3));
            assert_eq!(4096usize.ceil_log2(), Some(12));
            assert_eq!(4097usize.ceil_log2(), Some(13));
            assert_eq!(usize::MAX.ceil_log2(), Some(usize::BITS));
        }
    }
}

pub(crate) mod ptr {
    pub use core::ptr::*;

    use core::num::NonZeroUsize;

    #[cfg(feature = "sptr")]
    use sptr::Strict;

    /// Address accessors for `NonNull` that preserve provenance.
    ///
    /// With the `sptr` feature these are built on the `sptr` polyfills and
    /// work on every supported compiler. Without it they forward to the
    /// methods stabilized in Rust 1.84.
    pub trait NonNullStrict<T> {
        fn addr(self) -> NonZeroUsize
        where
            T: Sized;

        fn with_addr(self, addr: NonZeroUsize) -> Self
        where
            T: Sized;
    }

    impl<T> NonNullStrict<T> for NonNull<T> {
        fn addr(self) -> NonZeroUsize
        where
            T: Sized,
        {
            #[cfg(feature = "sptr")]
            let addr = Strict::addr(self.as_ptr());
            #[cfg(not(feature = "sptr"))]
            let addr = self.as_ptr().addr();

            // SAFETY: The pointer is guaranteed by the type to be non-null,
            // meaning that the address will be non-zero.
            unsafe { NonZeroUsize::new_unchecked(addr) }
        }

        fn with_addr(self, addr: NonZeroUsize) -> Self
        where
            T: Sized,
        {
            #[cfg(feature = "sptr")]
            let ptr = Strict::with_addr(self.as_ptr(), addr.get());
            #[cfg(not(feature = "sptr"))]
            let ptr = self.as_ptr().with_addr(addr.get());

            // SAFETY: The result of `with_addr` is non-null because `addr` is
            // guaranteed to be non-zero.
            unsafe { NonNull::new_unchecked(ptr) }
        }
    }

}
