#![no_main]

use alloc_hater::{AllocatorOp, Evaluator};
use arbitrary::Arbitrary;
use buddy_arena_hater::BuddySubject;
use libfuzzer_sys::fuzz_target;

/// Largest arena order exercised by the fuzzer.
const MAX_ORDER: u8 = 16;

#[derive(Clone, Debug, Arbitrary)]
struct Args {
    order: u8,
    ops: Vec<AllocatorOp>,
}

fuzz_target!(|args: Args| {
    let order = u32::from(args.order % MAX_ORDER) + 1;
    let subject = BuddySubject::new(order).expect("arena orders 1..=16 are supported");

    let mut eval = Evaluator::new(subject);
    if let Err(failed) = eval.evaluate(args.ops) {
        panic!("{failed:?}");
    }
});
