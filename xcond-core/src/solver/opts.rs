//! Options descriptor.

use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::backend::QpBackend;
use crate::error::XcondResult;
use crate::mem::{align_up, record, record_mut, tag, Arena, Block, Carver, RecordHeader};
use crate::options::{OptValue, OptionRoute, OptionRouter};
use crate::strategy::{CondensingStrategy, ShapePair};

pub const OPTS_TAG: u64 = tag(b"XCOPTS\0\0");

/// Strategy and backend option records carved into one arena: header,
/// strategy record, backend record.
#[derive(Clone)]
pub struct XcondOpts<SO, BO> {
    strategy: Block,
    backend: Block,
    arena: Arena,
    _records: PhantomData<(SO, BO)>,
}

impl<SO: Pod, BO: Pod> XcondOpts<SO, BO> {
    pub fn size<S, B>(strategy: &S, backend: &B, shapes: ShapePair<'_>) -> usize
    where
        S: CondensingStrategy<Opts = SO>,
        B: QpBackend<Opts = BO>,
    {
        RecordHeader::SIZE
            + align_up(strategy.opts_size(shapes))
            + align_up(backend.opts_size(shapes.condensed))
    }

    pub fn assign<S, B>(
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
        mut arena: Arena,
    ) -> XcondResult<Self>
    where
        S: CondensingStrategy<Opts = SO>,
        B: QpBackend<Opts = BO>,
    {
        let total = Self::size(strategy, backend, shapes);
        arena.expect_len(total)?;

        let mut c = Carver::new();
        let header = c.take(RecordHeader::SIZE);
        let strategy_block = c.take(strategy.opts_size(shapes));
        let backend_block = c.take(backend.opts_size(shapes.condensed));
        c.finish(total, "xcond opts")?;

        arena.words_mut().fill(0);
        RecordHeader::new(OPTS_TAG, total, &[strategy_block, backend_block])
            .write(arena.region_mut(header)?)?;
        let opts = Self {
            strategy: strategy_block,
            backend: backend_block,
            arena,
            _records: PhantomData,
        };
        // Both records must be viewable at their carved offsets.
        opts.strategy()?;
        opts.backend()?;
        Ok(opts)
    }

    pub fn strategy(&self) -> XcondResult<&SO> {
        Ok(record::<SO>(self.arena.region(self.strategy)?)?)
    }

    pub fn strategy_mut(&mut self) -> XcondResult<&mut SO> {
        Ok(record_mut::<SO>(self.arena.region_mut(self.strategy)?)?)
    }

    pub fn backend(&self) -> XcondResult<&BO> {
        Ok(record::<BO>(self.arena.region(self.backend)?)?)
    }

    pub fn backend_mut(&mut self) -> XcondResult<&mut BO> {
        Ok(record_mut::<BO>(self.arena.region_mut(self.backend)?)?)
    }

    /// Offsets of the strategy and backend records.
    pub fn blocks(&self) -> (Block, Block) {
        (self.strategy, self.backend)
    }

    /// Defaults, strategy first.
    pub fn initialize_default<S, B>(
        &mut self,
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
    ) -> XcondResult<()>
    where
        S: CondensingStrategy<Opts = SO>,
        B: QpBackend<Opts = BO>,
    {
        strategy.opts_initialize_default(shapes, self.strategy_mut()?);
        backend.opts_initialize_default(shapes.condensed, self.backend_mut()?);
        Ok(())
    }

    pub fn update<S, B>(&mut self, strategy: &S, backend: &B, shapes: ShapePair<'_>) -> XcondResult<()>
    where
        S: CondensingStrategy<Opts = SO>,
        B: QpBackend<Opts = BO>,
    {
        strategy.opts_update(shapes, self.strategy_mut()?)?;
        backend.opts_update(shapes.condensed, self.backend_mut()?)
    }

    /// Route `key` through `router` and hand it to the owning module.
    pub fn set<S, B>(
        &mut self,
        router: &OptionRouter,
        strategy: &S,
        backend: &B,
        key: &str,
        value: OptValue,
    ) -> XcondResult<()>
    where
        S: CondensingStrategy<Opts = SO>,
        B: QpBackend<Opts = BO>,
    {
        match router.route(key)? {
            OptionRoute::Strategy(name) => {
                log::debug!("option {key} = {value} -> {} {name}", router.strategy_tag());
                strategy.opts_set(self.strategy_mut()?, name, value)
            }
            OptionRoute::Backend(name) => {
                log::debug!("option {key} = {value} -> backend");
                backend.opts_set(self.backend_mut()?, name, value)
            }
        }
    }
}

impl<SO: Pod + fmt::Debug, BO: Pod + fmt::Debug> fmt::Debug for XcondOpts<SO, BO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XcondOpts")
            .field("strategy", &self.strategy().ok())
            .field("backend", &self.backend().ok())
            .finish()
    }
}
