#![no_main]

use std::ptr::NonNull;

use arbitrary::Arbitrary;
use buddy_arena::{BuddyAllocator, FreeError};
use libfuzzer_sys::fuzz_target;

const MAX_ORDER: u8 = 16;

#[derive(Clone, Debug, Arbitrary)]
enum BuddyOp {
    Allocate(usize),
    Deallocate(usize),
    /// Free an arbitrary offset, which may or may not be a live block.
    FreeOffset(usize),
    FreeAll,
}

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    order: u8,
    ops: Vec<BuddyOp>,
}

fuzz_target!(|args: Args| {
    let order = u32::from(args.order % MAX_ORDER) + 1;
    let mut alloc = BuddyAllocator::try_new(order).unwrap();

    let mut outstanding: Vec<NonNull<u8>> = Vec::new();

    for op in args.ops {
        match op {
            BuddyOp::Allocate(size) => {
                if let Ok(block) = alloc.allocate(size % (2 << order)) {
                    outstanding.push(block.cast());
                }
            }

            BuddyOp::Deallocate(raw_idx) => {
                if outstanding.is_empty() {
                    continue;
                }
                let idx = raw_idx % outstanding.len();
                let block = outstanding.swap_remove(idx);
                alloc.free(block).unwrap();
                assert_eq!(alloc.free(block), Err(FreeError::DoubleFreeOrInvalidAddress));
            }

            BuddyOp::FreeOffset(raw_ofs) => {
                let ofs = raw_ofs % alloc.capacity();
                let ptr = alloc.address_of(ofs).unwrap();
                let live = alloc.block_order(ptr).is_some();
                assert_eq!(alloc.free(ptr).is_ok(), live);
                outstanding.retain(|&p| p != ptr);
            }

            BuddyOp::FreeAll => {
                alloc.free_all();
                outstanding.clear();
            }
        }

        assert_eq!(alloc.live_blocks().count(), outstanding.len());
    }

    for block in outstanding {
        alloc.free(block).unwrap();
    }

    assert!(alloc.is_pristine());
});
