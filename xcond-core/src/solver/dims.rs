//! Dimension descriptor.

use std::fmt;

use crate::dims::{set_stage_field, DimField, QpDims};
use crate::error::XcondResult;
use crate::mem::{align_up, tag, Arena, Block, Carver, RecordHeader};
use crate::strategy::{CondensingStrategy, ShapePair, CONDENSED_DIMS, ORIGINAL_DIMS};

pub const DIMS_TAG: u64 = tag(b"XCDIMS\0\0");

/// Original shape plus the strategy's condensed-shape record, carved into one
/// arena: header, original record, strategy record.
#[derive(Clone)]
pub struct XcondDims<SD> {
    n: usize,
    orig: Block,
    cond: Block,
    strategy: SD,
    arena: Arena,
}

impl<SD: Clone + fmt::Debug> XcondDims<SD> {
    pub fn size<S>(strategy: &S, n: usize) -> usize
    where
        S: CondensingStrategy<Dims = SD>,
    {
        RecordHeader::SIZE + QpDims::size(n) + align_up(strategy.dims_size(n))
    }

    /// Carve a descriptor into `arena`, which must hold exactly
    /// [`XcondDims::size`] bytes.
    pub fn assign<S>(strategy: &S, n: usize, mut arena: Arena) -> XcondResult<Self>
    where
        S: CondensingStrategy<Dims = SD>,
    {
        let total = Self::size(strategy, n);
        arena.expect_len(total)?;

        let mut c = Carver::new();
        let header = c.take(RecordHeader::SIZE);
        let orig = c.take(QpDims::size(n));
        let cond = c.take(strategy.dims_size(n));
        c.finish(total, "xcond dims")?;

        arena.words_mut().fill(0);
        let [h, r] = arena.split_mut([header, cond])?;
        RecordHeader::new(DIMS_TAG, total, &[orig, cond]).write(h)?;
        let strategy_dims = strategy.dims_assign(n, r)?;
        log::debug!("xcond dims: N={n}, {total} bytes (strategy {} bytes)", cond.len);

        Ok(Self {
            n,
            orig,
            cond,
            strategy: strategy_dims,
            arena,
        })
    }

    /// Number of stages `N`.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn original(&self) -> XcondResult<QpDims<'_>> {
        QpDims::from_words(self.n, self.arena.region(self.orig)?)
    }

    /// Keyed accessor. `"orig_dims"` is answered from this record, every
    /// other key is the strategy's.
    pub fn get<S>(&self, strategy: &S, key: &str) -> XcondResult<QpDims<'_>>
    where
        S: CondensingStrategy<Dims = SD>,
    {
        match key {
            ORIGINAL_DIMS => self.original(),
            _ => strategy.dims_get(&self.strategy, self.arena.region(self.cond)?, key),
        }
    }

    pub fn condensed<S>(&self, strategy: &S) -> XcondResult<QpDims<'_>>
    where
        S: CondensingStrategy<Dims = SD>,
    {
        self.get(strategy, CONDENSED_DIMS)
    }

    pub fn shapes<S>(&self, strategy: &S) -> XcondResult<ShapePair<'_>>
    where
        S: CondensingStrategy<Dims = SD>,
    {
        Ok(ShapePair {
            original: self.original()?,
            condensed: self.condensed(strategy)?,
        })
    }

    /// Set one field of one stage in both the original and condensed views.
    pub fn set<S>(
        &mut self,
        strategy: &S,
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()>
    where
        S: CondensingStrategy<Dims = SD>,
    {
        set_stage_field(self.n, self.arena.region_mut(self.orig)?, stage, field, value)?;
        strategy.dims_set(&self.strategy, self.arena.region_mut(self.cond)?, stage, field, value)
    }

    pub fn header(&self) -> XcondResult<&RecordHeader> {
        Ok(RecordHeader::read(self.arena.words())?)
    }

    pub fn strategy_dims(&self) -> &SD {
        &self.strategy
    }
}

impl<SD: fmt::Debug> fmt::Debug for XcondDims<SD> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcondDims")
            .field("n", &self.n)
            .field("bytes", &self.arena.len())
            .field("strategy", &self.strategy)
            .finish()
    }
}
