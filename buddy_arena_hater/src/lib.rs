#![deny(unsafe_op_in_unsafe_fn)]

use std::ptr::NonNull;

use alloc_hater::Subject;
use buddy_arena::{AllocError, AllocInitError, BuddyAllocator, FreeError};

pub struct BuddySubject(BuddyAllocator);

impl BuddySubject {
    pub fn new(order: u32) -> Result<Self, AllocInitError> {
        let b = BuddyAllocator::try_new(order)?;
        Ok(BuddySubject(b))
    }

    pub fn allocator(&self) -> &BuddyAllocator {
        &self.0
    }
}

impl Subject for BuddySubject {
    type AllocError = AllocError;
    type FreeError = FreeError;

    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError> {
        self.0.allocate(size)
    }

    fn free(&mut self, ptr: NonNull<u8>) -> Result<(), Self::FreeError> {
        self.0.free(ptr)
    }

    fn is_reclaimed(&self) -> bool {
        self.0.is_pristine()
    }
}

#[cfg(test)]
mod tests {
    use alloc_hater::{AllocatorOp, Evaluator, Failure};
    use arbitrary::{Arbitrary, Unstructured};
    use quickcheck::{Gen, QuickCheck, TestResult};

    use super::*;

    #[test]
    fn survives_generated_op_streams() {
        fn prop(order: u8, data: Vec<u8>) -> TestResult {
            let order = 4 + u32::from(order % 12);
            let mut u = Unstructured::new(&data);
            let ops = match Vec::<AllocatorOp>::arbitrary(&mut u) {
                Ok(ops) => ops,
                Err(_) => return TestResult::discard(),
            };

            let mut eval = Evaluator::new(BuddySubject::new(order).unwrap());
            match eval.evaluate(ops) {
                Ok(()) => TestResult::passed(),
                Err(failed) => TestResult::error(format!("order {order}: {failed:?}")),
            }
        }

        QuickCheck::new()
            .gen(Gen::new(4096))
            .max_tests(64)
            .quickcheck(prop as fn(_, _) -> TestResult);
    }

    #[test]
    fn double_free_is_rejected() {
        use AllocatorOp::*;

        let ops = vec![
            Alloc(3),
            Alloc(1),
            Dealloc(0),
            Redealloc,
            Alloc(64),
            Dealloc(1),
            Redealloc,
            Redealloc,
        ];

        let mut eval = Evaluator::new(BuddySubject::new(8).unwrap());
        eval.evaluate(ops).unwrap();
        assert!(eval.into_subject().allocator().is_pristine());
    }

    #[test]
    fn oversized_requests_are_skipped() {
        use AllocatorOp::*;

        let ops = vec![Alloc(0), Alloc(17), Alloc(16), Alloc(1), Dealloc(3)];

        let mut eval = Evaluator::new(BuddySubject::new(4).unwrap());
        eval.evaluate(ops).unwrap();
    }

    /// A subject that never reclaims memory.
    struct Leaky(BuddySubject);

    impl Subject for Leaky {
        type AllocError = AllocError;
        type FreeError = FreeError;

        fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, AllocError> {
            self.0.allocate(size)
        }

        fn free(&mut self, _: NonNull<u8>) -> Result<(), FreeError> {
            Ok(())
        }

        fn is_reclaimed(&self) -> bool {
            self.0.is_reclaimed()
        }
    }

    #[test]
    fn evaluator_detects_misbehavior() {
        use AllocatorOp::*;

        let leaky = || Evaluator::new(Leaky(BuddySubject::new(6).unwrap()));

        let failed = leaky().evaluate(vec![Alloc(8), Dealloc(0)]).unwrap_err();
        assert_eq!(failed.failure, Failure::Leaked);
        assert!(failed.failed_op.is_none());

        let failed = leaky()
            .evaluate(vec![Alloc(8), Dealloc(0), Redealloc])
            .unwrap_err();
        assert_eq!(failed.failure, Failure::DoubleFreeAccepted);
        assert_eq!(failed.completed.len(), 2);
    }
}
