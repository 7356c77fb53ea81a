//! Per-order free and used sets.
//!
//! Each order `k` tracks the offsets of free and allocated blocks of `2^k`
//! bytes in ascending order, and a side table maps each allocated offset back
//! to its order so that blocks can be freed by address alone.
//!
//! The methods here are primitive mutations. They do not maintain the
//! cross-order partition of the arena; that is the job of the split and
//! coalesce logic in [`crate::buddy`].

use alloc::{
    collections::{BTreeMap, BTreeSet},
    vec::Vec,
};

use crate::core::fmt;

struct OrderSets {
    free: BTreeSet<usize>,
    used: BTreeSet<usize>,
}

impl OrderSets {
    const fn new() -> OrderSets {
        OrderSets {
            free: BTreeSet::new(),
            used: BTreeSet::new(),
        }
    }
}

pub struct Bookkeeping {
    orders: Vec<OrderSets>,
    /// Maps each allocated offset to its order.
    used_orders: BTreeMap<usize, u32>,
}

impl Bookkeeping {
    /// Creates bookkeeping for orders `0..=max_order`, with the whole arena
    /// as a single free block.
    pub fn new(max_order: u32) -> Bookkeeping {
        let mut orders = Vec::with_capacity(max_order as usize + 1);
        orders.resize_with(max_order as usize + 1, OrderSets::new);

        let mut books = Bookkeeping {
            orders,
            used_orders: BTreeMap::new(),
        };
        books.mark_free(max_order, 0);
        books
    }

    #[inline]
    fn level(&self, order: u32) -> &OrderSets {
        &self.orders[order as usize]
    }

    #[inline]
    fn level_mut(&mut self, order: u32) -> &mut OrderSets {
        &mut self.orders[order as usize]
    }

    /// Returns the highest order tracked.
    #[inline]
    pub fn max_order(&self) -> u32 {
        (self.orders.len() - 1) as u32
    }

    /// Removes and returns the smallest free offset at `order`.
    pub fn take_smallest_free(&mut self, order: u32) -> Option<usize> {
        self.level_mut(order).free.pop_first()
    }

    /// Returns `true` if any block of `order` is free.
    #[inline]
    pub fn has_free(&self, order: u32) -> bool {
        !self.level(order).free.is_empty()
    }

    /// Records the block `(order, offset)` as allocated.
    pub fn mark_used(&mut self, order: u32, offset: usize) {
        debug_assert!(!self.is_free(order, offset));

        self.level_mut(order).used.insert(offset);
        let prev = self.used_orders.insert(offset, order);
        debug_assert!(prev.is_none(), "offset {offset:#x} allocated twice");
    }

    /// Removes the allocated block starting at `offset`, returning its order.
    ///
    /// Returns `None` if no block is allocated at `offset`.
    pub fn unmark_used(&mut self, offset: usize) -> Option<u32> {
        let order = self.used_orders.remove(&offset)?;
        let removed = self.level_mut(order).used.remove(&offset);
        debug_assert!(removed);
        Some(order)
    }

    /// Returns the order of the allocated block starting at `offset`.
    #[inline]
    pub fn used_order(&self, offset: usize) -> Option<u32> {
        self.used_orders.get(&offset).copied()
    }

    /// Records the block `(order, offset)` as free.
    pub fn mark_free(&mut self, order: u32, offset: usize) {
        debug_assert_eq!(offset & ((1 << order) - 1), 0);

        let inserted = self.level_mut(order).free.insert(offset);
        debug_assert!(inserted, "block {offset:#x} of order {order} freed twice");
    }

    /// Returns `true` if the block `(order, offset)` is free.
    #[inline]
    pub fn is_free(&self, order: u32, offset: usize) -> bool {
        self.level(order).free.contains(&offset)
    }

    /// Removes the block `(order, offset)` from the free set, returning
    /// whether it was present.
    pub fn remove_free(&mut self, order: u32, offset: usize) -> bool {
        self.level_mut(order).free.remove(&offset)
    }

    /// Returns the free offsets at `order` in ascending order.
    pub fn free_offsets(&self, order: u32) -> impl Iterator<Item = usize> + '_ {
        self.level(order).free.iter().copied()
    }

    /// Returns the allocated blocks as `(offset, order)` pairs in ascending
    /// offset order.
    pub fn used_blocks(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.used_orders.iter().map(|(&ofs, &order)| (ofs, order))
    }

    /// Returns the number of allocated blocks.
    #[inline]
    pub fn num_used(&self) -> usize {
        self.used_orders.len()
    }

    /// Returns the total size of the allocated blocks in bytes.
    pub fn used_bytes(&self) -> usize {
        self.used_orders.values().map(|&order| 1_usize << order).sum()
    }

    /// Returns `true` if the whole arena is a single free block.
    pub fn is_pristine(&self) -> bool {
        let max_order = self.max_order();

        self.used_orders.is_empty()
            && self.orders.iter().enumerate().all(|(order, sets)| {
                sets.used.is_empty()
                    && if order as u32 == max_order {
                        sets.free.len() == 1 && sets.free.contains(&0)
                    } else {
                        sets.free.is_empty()
                    }
            })
    }

    /// Discards every free and allocated block and restores the initial
    /// single free block.
    pub fn reset(&mut self) {
        for sets in self.orders.iter_mut() {
            sets.free.clear();
            sets.used.clear();
        }
        self.used_orders.clear();

        let max_order = self.max_order();
        self.mark_free(max_order, 0);
    }

    /// Asserts that the tracked blocks partition the arena.
    #[cfg(test)]
    pub fn assert_invariants(&self) {
        let max_order = self.max_order();
        let mut blocks = Vec::new();

        for (order, sets) in self.orders.iter().enumerate() {
            let order = order as u32;

            assert!(
                sets.free.is_disjoint(&sets.used),
                "order {order} has blocks that are both free and used"
            );

            for &ofs in sets.free.iter().chain(sets.used.iter()) {
                assert_eq!(ofs % (1 << order), 0, "block {ofs:#x} misaligned for order {order}");
                assert!(ofs < 1 << max_order, "block {ofs:#x} outside arena");
                blocks.push((ofs, order));
            }

            for &ofs in sets.used.iter() {
                assert_eq!(self.used_orders.get(&ofs), Some(&order));
            }
        }

        assert_eq!(
            self.used_orders.len(),
            self.orders.iter().map(|s| s.used.len()).sum::<usize>(),
            "offset-to-order map out of sync with used sets"
        );

        blocks.sort_unstable();

        let mut next = 0;
        for (ofs, order) in blocks {
            assert_eq!(ofs, next, "gap or overlap at {next:#x}");
            next = ofs + (1 << order);
        }
        assert_eq!(next, 1 << max_order, "blocks do not cover the arena");
    }
}

impl fmt::Debug for Bookkeeping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (order, sets) in self.orders.iter().enumerate() {
            if !sets.free.is_empty() || !sets.used.is_empty() {
                map.entry(&order, &(sets.free.len(), sets.used.len()));
            }
        }
        map.finish()
    }
}
