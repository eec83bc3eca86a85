//! Memory arena builder.
//!
//! The persistent region of one solver instance, carved in a fixed order:
//!
//! ```text
//! | header | strategy memory | backend memory | condensed qp_in | condensed qp_out |
//! ```
//!
//! Strategy and backend memory are opaque regions described by the block
//! tables their modules returned on assignment. The two condensed records are
//! laid out over the condensed shape.

use std::fmt;

use crate::backend::QpBackend;
use crate::dims::{QpDims, StageDims};
use crate::error::{XcondError, XcondResult};
use crate::mem::{align_up, tag, Arena, Block, Carver, RecordHeader};
use crate::qp::{QpIn, QpInLayout, QpInMut, QpOut, QpOutLayout, QpOutMut};
use crate::strategy::{CondensingStrategy, ShapePair};

pub const MEMORY_TAG: u64 = tag(b"XCMEM\0\0\0");

/// Offsets of the sub-regions of a memory arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    pub header: Block,
    pub strategy: Block,
    pub backend: Block,
    pub cond_in: Block,
    pub cond_out: Block,
    pub total: usize,
}

impl MemoryLayout {
    fn children(&self) -> [Block; 4] {
        [self.strategy, self.backend, self.cond_in, self.cond_out]
    }
}

/// Persistent memory of an [`XcondSolver`](super::XcondSolver).
#[derive(Clone)]
pub struct XcondMemory<SM, BM> {
    original: Vec<StageDims>,
    layout: MemoryLayout,
    strategy: SM,
    backend: BM,
    cond_in: QpInLayout,
    cond_out: QpOutLayout,
    arena: Arena,
}

/// Live views of every sub-region for the duration of one solve.
pub(crate) struct MemoryParts<'a, SM, BM> {
    pub epoch: u64,
    pub strategy: &'a SM,
    pub strategy_region: &'a mut [u64],
    pub backend: &'a BM,
    pub backend_region: &'a mut [u64],
    pub cond_in: QpInMut<'a>,
    pub cond_out: QpOutMut<'a>,
}

impl<SM: Clone + fmt::Debug, BM: Clone + fmt::Debug> XcondMemory<SM, BM> {
    pub fn size<S, B>(
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
        strategy_opts: &S::Opts,
        backend_opts: &B::Opts,
    ) -> usize
    where
        S: CondensingStrategy<Memory = SM>,
        B: QpBackend<Memory = BM>,
    {
        let cond = shapes.condensed;
        RecordHeader::SIZE
            + align_up(strategy.memory_size(shapes, strategy_opts))
            + align_up(backend.memory_size(cond, backend_opts))
            + QpInLayout::size(cond)
            + QpOutLayout::size(cond)
    }

    /// Carve the memory arena. `arena` must hold exactly [`XcondMemory::size`]
    /// bytes.
    pub fn assign<S, B>(
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
        strategy_opts: &S::Opts,
        backend_opts: &B::Opts,
        mut arena: Arena,
    ) -> XcondResult<Self>
    where
        S: CondensingStrategy<Memory = SM>,
        B: QpBackend<Memory = BM>,
    {
        let cond = shapes.condensed;
        let total = Self::size(strategy, backend, shapes, strategy_opts, backend_opts);
        arena.expect_len(total)?;

        let mut c = Carver::new();
        let header = c.take(RecordHeader::SIZE);
        let strategy_block = c.take(strategy.memory_size(shapes, strategy_opts));
        let backend_block = c.take(backend.memory_size(cond, backend_opts));
        let cond_in_block = c.take(QpInLayout::size(cond));
        let cond_out_block = c.take(QpOutLayout::size(cond));
        c.finish(total, "xcond memory")?;

        let layout = MemoryLayout {
            header,
            strategy: strategy_block,
            backend: backend_block,
            cond_in: cond_in_block,
            cond_out: cond_out_block,
            total,
        };
        arena.words_mut().fill(0);
        let [h, s, b] = arena.split_mut([header, strategy_block, backend_block])?;
        RecordHeader::new(MEMORY_TAG, total, &layout.children()).write(h)?;
        let strategy_mem = strategy.memory_assign(shapes, strategy_opts, s)?;
        let backend_mem = backend.memory_assign(cond, backend_opts, b)?;

        log::debug!(
            "xcond memory: {total} bytes (strategy {}, backend {}, qp_in {}, qp_out {})",
            strategy_block.len,
            backend_block.len,
            cond_in_block.len,
            cond_out_block.len
        );

        Ok(Self {
            original: shapes.original.stages().to_vec(),
            layout,
            strategy: strategy_mem,
            backend: backend_mem,
            cond_in: QpInLayout::assign(cond)?,
            cond_out: QpOutLayout::assign(cond)?,
            arena,
        })
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn original(&self) -> QpDims<'_> {
        QpDims::new(&self.original)
    }

    pub fn condensed(&self) -> QpDims<'_> {
        self.cond_in.dims()
    }

    /// Shapes the memory was carved for.
    pub fn shapes(&self) -> ShapePair<'_> {
        ShapePair {
            original: self.original(),
            condensed: self.condensed(),
        }
    }

    /// Completed solves.
    pub fn epoch(&self) -> XcondResult<u64> {
        let header = RecordHeader::read(self.arena.region(self.layout.header)?)?;
        Ok(header.epoch)
    }

    pub fn strategy(&self) -> &SM {
        &self.strategy
    }

    pub fn strategy_region(&self) -> XcondResult<&[u64]> {
        Ok(self.arena.region(self.layout.strategy)?)
    }

    pub fn backend(&self) -> &BM {
        &self.backend
    }

    pub fn backend_region(&self) -> XcondResult<&[u64]> {
        Ok(self.arena.region(self.layout.backend)?)
    }

    /// Condensed input of the last solve.
    pub fn cond_in(&self) -> XcondResult<QpIn<'_>> {
        Ok(QpIn::new(&self.cond_in, self.arena.region(self.layout.cond_in)?)?)
    }

    /// Condensed output of the last solve.
    pub fn cond_out(&self) -> XcondResult<QpOut<'_>> {
        Ok(QpOut::new(&self.cond_out, self.arena.region(self.layout.cond_out)?)?)
    }

    /// Check that `qp_in`/`qp_out` have the shape this memory was carved for.
    pub(crate) fn check_original(
        &self,
        qp_in: QpDims<'_>,
        qp_out: QpDims<'_>,
    ) -> XcondResult<()> {
        let expected = self.original();
        if qp_in != expected || qp_out != expected {
            return Err(XcondError::InvalidDimension(format!(
                "records do not match the shape the memory was carved for: {expected:?}"
            )));
        }
        Ok(())
    }

    /// Verify the header, advance the epoch and split the arena.
    pub(crate) fn begin_solve(&mut self) -> XcondResult<MemoryParts<'_, SM, BM>> {
        let layout = self.layout;
        let [h, s, b, ci, co] = self.arena.split_mut([
            layout.header,
            layout.strategy,
            layout.backend,
            layout.cond_in,
            layout.cond_out,
        ])?;
        let header = RecordHeader::read_mut(h)?;
        header.verify(MEMORY_TAG, layout.total, &layout.children())?;
        header.epoch += 1;

        Ok(MemoryParts {
            epoch: header.epoch,
            strategy: &self.strategy,
            strategy_region: s,
            backend: &self.backend,
            backend_region: b,
            cond_in: QpInMut::new(&self.cond_in, ci)?,
            cond_out: QpOutMut::new(&self.cond_out, co)?,
        })
    }

    /// Raw words of the whole arena.
    pub fn words(&self) -> &[u64] {
        self.arena.words()
    }

    /// Mutable raw words; writing here can invalidate the header.
    pub fn words_mut(&mut self) -> &mut [u64] {
        self.arena.words_mut()
    }
}

impl<SM: fmt::Debug, BM: fmt::Debug> fmt::Debug for XcondMemory<SM, BM> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcondMemory")
            .field("layout", &self.layout)
            .field("strategy", &self.strategy)
            .field("backend", &self.backend)
            .finish()
    }
}
