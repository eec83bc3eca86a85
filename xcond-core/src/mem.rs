//! Byte-exact arena carving.
//!
//! Every structure the pipeline touches during a solve lives in one of a few
//! caller-allocated buffers. Sizing and carving are separate passes:
//!
//! ```text
//! size   = f(dims, opts)              closed-form sum, no memory touched
//! buffer = Arena::new(size)           the only allocation
//! layout = assign(dims, opts, buffer) walks a Carver over the same pieces
//! ```
//!
//! The carving pass finishes by comparing its cursor against the closed-form
//! size. Offsets are bytes; every block starts on an [`ALIGN`] boundary and
//! occupies its length rounded up to the next boundary, so any block can be
//! viewed as `f64` data.
//!
//! Arenas are backed by `u64` words, which gives the base pointer 8-byte
//! alignment on every host without padding the front of the buffer.

use std::mem::size_of;
use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::error::LayoutError;

/// Alignment of every block start (double-word).
pub const ALIGN: usize = 8;

/// Maximum number of child blocks a [`RecordHeader`] can describe.
pub const MAX_CHILDREN: usize = 4;

/// Round `bytes` up to the next multiple of [`ALIGN`].
#[inline]
pub const fn align_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Padded bytes for `n` doubles.
#[inline]
pub const fn f64_bytes(n: usize) -> usize {
    align_up(n * size_of::<f64>())
}

/// Padded bytes for `n` 32-bit indices.
#[inline]
pub const fn u32_bytes(n: usize) -> usize {
    align_up(n * size_of::<u32>())
}

/// Padded bytes for `count` records of type `T`.
#[inline]
pub const fn record_bytes<T: Pod>(count: usize) -> usize {
    align_up(count * size_of::<T>())
}

/// Pack an 8-byte name into a header tag.
#[inline]
pub const fn tag(name: &[u8; 8]) -> u64 {
    u64::from_le_bytes(*name)
}

/// A byte range inside a region.
///
/// `len` is the exact payload length; the block spans `len` rounded up to
/// [`ALIGN`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Block {
    pub offset: usize,
    pub len: usize,
}

impl Block {
    /// Bytes spanned including trailing padding.
    #[inline]
    pub const fn span(&self) -> usize {
        align_up(self.len)
    }

    /// First byte past the padded span.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.span()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Word range covered by the padded span.
    #[inline]
    pub fn word_range(&self) -> Range<usize> {
        self.offset / ALIGN..self.end() / ALIGN
    }

    fn check(&self, capacity: usize) -> Result<(), LayoutError> {
        if self.offset % ALIGN != 0 {
            return Err(LayoutError::Misaligned {
                offset: self.offset,
                align: ALIGN,
            });
        }
        if self.end() > capacity {
            return Err(LayoutError::OutOfBounds {
                offset: self.offset,
                len: self.len,
                capacity,
            });
        }
        Ok(())
    }

    /// Checked view of this block inside `words`.
    pub fn slice<'a>(&self, words: &'a [u64]) -> Result<&'a [u64], LayoutError> {
        self.check(words.len() * ALIGN)?;
        Ok(&words[self.word_range()])
    }

    /// Checked mutable view of this block inside `words`.
    pub fn slice_mut<'a>(&self, words: &'a mut [u64]) -> Result<&'a mut [u64], LayoutError> {
        self.check(words.len() * ALIGN)?;
        Ok(&mut words[self.word_range()])
    }
}

/// Sequential carver over a region.
///
/// Offsets are relative to the start of the region being carved; nested
/// modules carve their own sub-regions with a fresh carver.
#[derive(Debug, Default)]
pub struct Carver {
    cursor: usize,
}

impl Carver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `bytes` bytes at the cursor.
    pub fn take(&mut self, bytes: usize) -> Block {
        debug_assert_eq!(self.cursor % ALIGN, 0, "carver cursor lost alignment");
        let block = Block {
            offset: self.cursor,
            len: bytes,
        };
        self.cursor += block.span();
        block
    }

    pub fn take_f64(&mut self, n: usize) -> Block {
        self.take(n * size_of::<f64>())
    }

    pub fn take_u32(&mut self, n: usize) -> Block {
        self.take(n * size_of::<u32>())
    }

    pub fn take_record<T: Pod>(&mut self, count: usize) -> Block {
        self.take(count * size_of::<T>())
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Close the carve and check it against the precomputed size.
    ///
    /// Debug builds halt on a mismatch; release builds report it.
    pub fn finish(self, expected: usize, what: &'static str) -> Result<usize, LayoutError> {
        debug_assert!(
            self.cursor == expected,
            "{what} layout mismatch: carved {} bytes, expected {expected}",
            self.cursor
        );
        if self.cursor != expected {
            log::error!(
                "{what} layout mismatch: carved {} bytes, expected {expected}",
                self.cursor
            );
            return Err(LayoutError::SizeMismatch {
                expected,
                carved: self.cursor,
            });
        }
        Ok(self.cursor)
    }
}

/// Exclusively owned, zero-initialized, 8-byte aligned buffer.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    words: Box<[u64]>,
}

impl Arena {
    /// Allocate an arena of `bytes` bytes (rounded up to whole words).
    pub fn new(bytes: usize) -> Self {
        Self {
            words: vec![0u64; align_up(bytes) / ALIGN].into_boxed_slice(),
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.words.len() * ALIGN
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }

    /// Fail unless the arena is exactly `required` bytes.
    pub fn expect_len(&self, required: usize) -> Result<(), LayoutError> {
        if self.len() != required {
            return Err(LayoutError::BufferSize {
                required,
                actual: self.len(),
            });
        }
        Ok(())
    }

    pub fn region(&self, block: Block) -> Result<&[u64], LayoutError> {
        block.slice(&self.words)
    }

    pub fn region_mut(&mut self, block: Block) -> Result<&mut [u64], LayoutError> {
        block.slice_mut(&mut self.words)
    }

    /// Disjoint mutable views of several blocks at once.
    pub fn split_mut<const N: usize>(
        &mut self,
        blocks: [Block; N],
    ) -> Result<[&mut [u64]; N], LayoutError> {
        split_regions_mut(&mut self.words, blocks)
    }
}

/// Split `words` into disjoint mutable views, one per block, in the order
/// the blocks were given. Blocks may be passed in any order but must not
/// overlap.
pub fn split_regions_mut<'a, const N: usize>(
    mut words: &'a mut [u64],
    blocks: [Block; N],
) -> Result<[&'a mut [u64]; N], LayoutError> {
    let capacity = words.len() * ALIGN;
    for block in &blocks {
        block.check(capacity)?;
    }

    let mut order: [usize; N] = std::array::from_fn(|i| i);
    order.sort_unstable_by_key(|&i| blocks[i].offset);

    let mut out: [&'a mut [u64]; N] = std::array::from_fn(|_| Default::default());
    let mut consumed = 0usize;
    for &i in &order {
        let range = blocks[i].word_range();
        if range.start < consumed {
            return Err(LayoutError::Overlap {
                offset: blocks[i].offset,
            });
        }
        let rest = std::mem::take(&mut words);
        let (_, tail) = rest.split_at_mut(range.start - consumed);
        let (head, tail) = tail.split_at_mut(range.end - range.start);
        out[i] = head;
        words = tail;
        consumed = range.end;
    }
    Ok(out)
}

#[inline]
pub fn f64s(words: &[u64]) -> &[f64] {
    bytemuck::cast_slice(words)
}

#[inline]
pub fn f64s_mut(words: &mut [u64]) -> &mut [f64] {
    bytemuck::cast_slice_mut(words)
}

#[inline]
pub fn u32s(words: &[u64]) -> &[u32] {
    bytemuck::cast_slice(words)
}

#[inline]
pub fn u32s_mut(words: &mut [u64]) -> &mut [u32] {
    bytemuck::cast_slice_mut(words)
}

fn cast_err<T>(len: usize) -> LayoutError {
    LayoutError::Cast {
        ty: std::any::type_name::<T>(),
        len,
    }
}

/// View the start of a region as one `T`.
pub fn record<T: Pod>(words: &[u64]) -> Result<&T, LayoutError> {
    records::<T>(words, 1).map(|r| &r[0])
}

pub fn record_mut<T: Pod>(words: &mut [u64]) -> Result<&mut T, LayoutError> {
    records_mut::<T>(words, 1).map(|r| &mut r[0])
}

/// View the start of a region as `count` consecutive `T`s.
pub fn records<T: Pod>(words: &[u64], count: usize) -> Result<&[T], LayoutError> {
    let bytes: &[u8] = bytemuck::cast_slice(words);
    let len = count * size_of::<T>();
    if len > bytes.len() {
        return Err(cast_err::<T>(bytes.len()));
    }
    bytemuck::try_cast_slice(&bytes[..len]).map_err(|_| cast_err::<T>(len))
}

pub fn records_mut<T: Pod>(words: &mut [u64], count: usize) -> Result<&mut [T], LayoutError> {
    let bytes: &mut [u8] = bytemuck::cast_slice_mut(words);
    let len = count * size_of::<T>();
    if len > bytes.len() {
        return Err(cast_err::<T>(bytes.len()));
    }
    bytemuck::try_cast_slice_mut(&mut bytes[..len]).map_err(|_| cast_err::<T>(len))
}

/// Header placed at the front of every composite record.
///
/// It records the tag of the record kind, the total carved size and the
/// child block table, so a descriptor can check that the buffer it is handed
/// really carries its layout. `epoch` is a free counter for the owner.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    pub tag: u64,
    pub total: u64,
    pub epoch: u64,
    pub children: u64,
    pub blocks: [[u64; 2]; MAX_CHILDREN],
}

impl RecordHeader {
    pub const SIZE: usize = record_bytes::<RecordHeader>(1);

    pub fn new(tag: u64, total: usize, children: &[Block]) -> Self {
        debug_assert!(children.len() <= MAX_CHILDREN);
        let mut header = Self::zeroed();
        header.tag = tag;
        header.total = total as u64;
        header.children = children.len() as u64;
        for (slot, block) in header.blocks.iter_mut().zip(children) {
            *slot = [block.offset as u64, block.len as u64];
        }
        header
    }

    /// Check this header against the layout a descriptor believes in.
    pub fn verify(&self, tag: u64, total: usize, children: &[Block]) -> Result<(), LayoutError> {
        if self.tag != tag {
            return Err(LayoutError::Header("tag"));
        }
        if self.total != total as u64 {
            return Err(LayoutError::Header("total size"));
        }
        let expected = Self::new(tag, total, children);
        if self.children != expected.children || self.blocks != expected.blocks {
            return Err(LayoutError::Header("block table"));
        }
        Ok(())
    }

    pub fn read(words: &[u64]) -> Result<&Self, LayoutError> {
        record::<Self>(words)
    }

    pub fn read_mut(words: &mut [u64]) -> Result<&mut Self, LayoutError> {
        record_mut::<Self>(words)
    }

    pub fn write(self, words: &mut [u64]) -> Result<(), LayoutError> {
        *record_mut::<Self>(words)? = self;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(13), 16);
        assert_eq!(u32_bytes(3), 16);
        assert_eq!(f64_bytes(3), 24);
    }

    #[test]
    fn test_carver_keeps_alignment() {
        let mut c = Carver::new();
        let a = c.take_u32(3); // 12 bytes, padded to 16
        let b = c.take_f64(2);
        let d = c.take(1);
        let e = c.take_f64(0);
        assert_eq!(a, Block { offset: 0, len: 12 });
        assert_eq!(b.offset, 16);
        assert_eq!(d.offset, 32);
        assert_eq!(e.offset, 40);
        assert!(e.is_empty());
        assert_eq!(c.finish(40, "test").unwrap(), 40);
    }

    #[test]
    fn test_header_size_is_word_multiple() {
        assert_eq!(RecordHeader::SIZE % ALIGN, 0);
        assert_eq!(RecordHeader::SIZE, size_of::<RecordHeader>());
    }

    #[test]
    fn test_split_regions_any_order() {
        let mut arena = Arena::new(64);
        let a = Block { offset: 0, len: 16 };
        let b = Block { offset: 16, len: 8 };
        let c = Block { offset: 32, len: 32 };
        {
            let [rc, ra, rb] = arena.split_mut([c, a, b]).unwrap();
            assert_eq!(ra.len(), 2);
            assert_eq!(rb.len(), 1);
            assert_eq!(rc.len(), 4);
            f64s_mut(ra)[1] = 1.5;
            f64s_mut(rc)[0] = -2.0;
        }
        assert_eq!(f64s(arena.region(a).unwrap())[1], 1.5);
        assert_eq!(f64s(arena.region(c).unwrap())[0], -2.0);
    }

    #[test]
    fn test_split_regions_rejects_overlap_and_overrun() {
        let mut arena = Arena::new(32);
        let a = Block { offset: 0, len: 16 };
        let b = Block { offset: 8, len: 8 };
        assert!(matches!(
            arena.split_mut([a, b]),
            Err(LayoutError::Overlap { offset: 8 })
        ));
        let far = Block { offset: 24, len: 16 };
        assert!(matches!(
            arena.split_mut([far]),
            Err(LayoutError::OutOfBounds { .. })
        ));
        let odd = Block { offset: 4, len: 4 };
        assert!(matches!(
            arena.region(odd),
            Err(LayoutError::Misaligned { offset: 4, .. })
        ));
    }

    #[test]
    fn test_header_roundtrip_and_verify() {
        let mut arena = Arena::new(RecordHeader::SIZE);
        let kids = [Block { offset: 96, len: 10 }, Block { offset: 112, len: 0 }];
        RecordHeader::new(tag(b"TESTREC\0"), 112, &kids)
            .write(arena.words_mut())
            .unwrap();
        let header = RecordHeader::read(arena.words()).unwrap();
        assert!(header.verify(tag(b"TESTREC\0"), 112, &kids).is_ok());
        assert_eq!(
            header.verify(tag(b"OTHER\0\0\0"), 112, &kids),
            Err(LayoutError::Header("tag"))
        );
        assert_eq!(
            header.verify(tag(b"TESTREC\0"), 112, &kids[..1]),
            Err(LayoutError::Header("block table"))
        );
    }

    #[test]
    fn test_records_too_short() {
        let words = [0u64; 2];
        assert!(records::<RecordHeader>(&words, 1).is_err());
        assert_eq!(records::<u32>(&words, 4).unwrap().len(), 4);
    }

    #[test]
    fn test_arena_expect_len() {
        let arena = Arena::new(24);
        assert!(arena.expect_len(24).is_ok());
        assert_eq!(
            arena.expect_len(32),
            Err(LayoutError::BufferSize { required: 32, actual: 24 })
        );
    }
}
