//! A small library for ~~hating on~~ evaluating the correctness of allocators
//! that hand out blocks by size and take them back by address.
#![deny(unsafe_op_in_unsafe_fn)]

use core::{fmt::Debug, mem::MaybeUninit, ptr::NonNull, slice};

/// Limit on generated allocation sizes, expressed in bits.
const SIZE_LIMIT_BITS: u8 = 16;

/// An allocation size which implements `Arbitrary`.
///
/// Sizes are spread evenly between powers of two, and may be zero.
#[derive(Clone, Copy, Debug)]
pub struct ArbSize(pub usize);

impl arbitrary::Arbitrary<'_> for ArbSize {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let exp = u8::arbitrary(u)? % (SIZE_LIMIT_BITS + 1);
        let size = usize::arbitrary(u)? % (1 << exp);

        Ok(ArbSize(size))
    }
}

#[derive(arbitrary::Arbitrary)]
enum AllocatorOpTag {
    Alloc,
    Dealloc,
    Redealloc,
}

#[derive(Clone, Debug)]
pub enum AllocatorOp {
    /// Allocate a block of at least this many bytes.
    Alloc(usize),
    /// Free an outstanding block.
    ///
    /// Given `n` outstanding blocks, the block to free is at index `idx % n`.
    Dealloc(usize),
    /// Free the most recently freed block again.
    ///
    /// Does nothing if a block has been allocated since the last free.
    Redealloc,
}

impl arbitrary::Arbitrary<'_> for AllocatorOp {
    fn arbitrary(u: &mut arbitrary::Unstructured<'_>) -> arbitrary::Result<Self> {
        let tag = AllocatorOpTag::arbitrary(u)?;

        let op = match tag {
            AllocatorOpTag::Alloc => AllocatorOp::Alloc(ArbSize::arbitrary(u)?.0),
            AllocatorOpTag::Dealloc => AllocatorOp::Dealloc(usize::arbitrary(u)?),
            AllocatorOpTag::Redealloc => AllocatorOp::Redealloc,
        };

        Ok(op)
    }
}

pub trait Subject {
    type AllocError: Debug;
    type FreeError: Debug;

    /// Allocates a block of at least `size` bytes.
    fn allocate(&mut self, size: usize) -> Result<NonNull<[u8]>, Self::AllocError>;

    /// Frees the block starting at `ptr`.
    ///
    /// Implementations must reject pointers that are not the start of an
    /// outstanding block rather than exhibit undefined behavior.
    fn free(&mut self, ptr: NonNull<u8>) -> Result<(), Self::FreeError>;

    /// Returns `true` if no blocks are outstanding and all memory has been
    /// reclaimed.
    fn is_reclaimed(&self) -> bool;
}

/// A list of allocated blocks.
#[derive(Default)]
pub struct Blocks {
    blocks: Vec<Block>,
}

impl Blocks {
    pub fn new() -> Blocks {
        Blocks { blocks: Vec::new() }
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    pub fn remove_modulo(&mut self, idx: usize) -> Option<Block> {
        let len = self.blocks.len();
        (len != 0).then(|| self.blocks.swap_remove(idx % len))
    }
}

impl IntoIterator for Blocks {
    type Item = Block;

    type IntoIter = std::vec::IntoIter<Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.into_iter()
    }
}

/// An allocated block of memory.
pub struct Block {
    // A pointer to the allocated region.
    ptr: NonNull<[u8]>,
    // The unique ID of the last operation that wrote to this allocation.
    id: u64,
}

unsafe fn slice_ptr_to_uninit_slice_mut<'a>(ptr: NonNull<[u8]>) -> &'a mut [MaybeUninit<u8>] {
    unsafe { slice::from_raw_parts_mut(ptr.cast().as_ptr(), ptr.len()) }
}

unsafe fn paint(slice: &mut [MaybeUninit<u8>], id: u64) {
    let id_bytes = id.to_le_bytes().into_iter().cycle();

    for (byte, value) in slice.iter_mut().zip(id_bytes) {
        byte.write(value);
    }
}

impl Block {
    /// Creates a block from `ptr` and paints it according to `id`.
    ///
    /// # Safety
    ///
    /// The caller must uphold the following invariants:
    /// - `ptr` must be valid for reads and writes for `ptr.len()` bytes.
    /// - No references to the memory at `ptr` may exist when this function is called.
    /// - No accesses to the memory at `ptr` may be made except by way of the returned `Block`
    ///   until said `Block` is dropped.
    pub unsafe fn init(ptr: NonNull<[u8]>, id: u64) -> Block {
        let mut b = Block { ptr, id };
        b.paint(id);
        b
    }

    /// Returns a pointer to the start of the block.
    pub fn start(&self) -> NonNull<u8> {
        self.ptr.cast()
    }

    /// Returns the `Block`'s memory as a mutable slice of uninitialized bytes.
    pub fn as_uninit_slice_mut(&mut self) -> &mut [MaybeUninit<u8>] {
        // SAFETY: self is mutably borrowed, so no other references to the
        // slice can exist
        unsafe { slice_ptr_to_uninit_slice_mut(self.ptr) }
    }

    /// "Paints" the memory contained by `self` with the value of `id`.
    pub fn paint(&mut self, id: u64) {
        self.id = id;
        unsafe { paint(self.as_uninit_slice_mut(), id) };
    }

    /// Verifies that the memory contained by `self` has not been overwritten.
    pub fn verify(&self) -> bool {
        let slice: &[u8] = unsafe { self.ptr.as_ref() };
        let id_bytes = self.id.to_le_bytes().into_iter().cycle();

        slice.iter().zip(id_bytes).all(|(byte, value)| *byte == value)
    }
}

pub struct Evaluator<S: Subject> {
    subject: S,
}

/// The way in which a subject misbehaved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// An allocation returned fewer bytes than requested.
    Undersized { requested: usize, len: usize },
    /// A block's contents changed while it was outstanding.
    Corrupted,
    /// Freeing an outstanding block was rejected.
    FreeRejected,
    /// Freeing an already-freed block was accepted.
    DoubleFreeAccepted,
    /// Memory was not reclaimed after every block was freed.
    Leaked,
}

#[derive(Clone, Debug)]
pub struct Failed {
    pub completed: Vec<AllocatorOp>,
    /// The operation that exposed the failure, or `None` if it was exposed
    /// while freeing the remaining blocks.
    pub failed_op: Option<AllocatorOp>,
    pub failure: Failure,
}

impl<S: Subject> Evaluator<S> {
    pub fn new(subject: S) -> Evaluator<S> {
        Evaluator { subject }
    }

    pub fn into_subject(self) -> S {
        self.subject
    }

    pub fn evaluate<I>(&mut self, ops: I) -> Result<(), Failed>
    where
        I: IntoIterator<Item = AllocatorOp>,
    {
        let mut completed = Vec::new();
        let mut blocks = Blocks::new();
        let mut last_freed: Option<NonNull<u8>> = None;

        for (op_id, op) in ops.into_iter().enumerate() {
            let op_id: u64 = op_id.try_into().unwrap();

            let res = match op {
                AllocatorOp::Alloc(size) => match self.subject.allocate(size) {
                    Ok(ptr) if ptr.len() < size => Err(Failure::Undersized {
                        requested: size,
                        len: ptr.len(),
                    }),

                    Ok(ptr) => {
                        // The address may be handed out again.
                        last_freed = None;

                        let block = unsafe { Block::init(ptr, op_id) };
                        blocks.push(block);
                        Ok(())
                    }

                    Err(_) => Ok(()),
                },

                AllocatorOp::Dealloc(raw_idx) => match blocks.remove_modulo(raw_idx) {
                    Some(block) if !block.verify() => Err(Failure::Corrupted),

                    Some(mut block) => {
                        block.paint(op_id);

                        match self.subject.free(block.start()) {
                            Ok(()) => {
                                last_freed = Some(block.start());
                                Ok(())
                            }
                            Err(_) => Err(Failure::FreeRejected),
                        }
                    }

                    None => Ok(()),
                },

                AllocatorOp::Redealloc => match last_freed.take() {
                    Some(ptr) if self.subject.free(ptr).is_ok() => {
                        Err(Failure::DoubleFreeAccepted)
                    }
                    _ => Ok(()),
                },
            };

            if let Err(failure) = res {
                return Err(Failed {
                    completed,
                    failed_op: Some(op),
                    failure,
                });
            }

            completed.push(op);
        }

        for block in blocks {
            let failure = if !block.verify() {
                Some(Failure::Corrupted)
            } else if self.subject.free(block.start()).is_err() {
                Some(Failure::FreeRejected)
            } else {
                None
            };

            if let Some(failure) = failure {
                return Err(Failed {
                    completed,
                    failed_op: None,
                    failure,
                });
            }
        }

        if !self.subject.is_reclaimed() {
            return Err(Failed {
                completed,
                failed_op: None,
                failure: Failure::Leaked,
            });
        }

        Ok(())
    }
}
