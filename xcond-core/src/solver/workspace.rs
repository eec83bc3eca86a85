//! Workspace overlay.
//!
//! Scratch for one solve. Nothing in it survives the call, so the caller may
//! reuse one buffer across solver instances as long as solves over it do not
//! overlap; the `&mut` borrow taken by `evaluate` enforces that.

use crate::backend::QpBackend;
use crate::error::{LayoutError, XcondResult};
use crate::mem::{align_up, split_regions_mut, Block, Carver, ALIGN};
use crate::strategy::{CondensingStrategy, ShapePair};

/// Strategy and backend scratch regions inside a workspace buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkspaceOverlay {
    pub strategy: Block,
    pub backend: Block,
    total: usize,
}

impl WorkspaceOverlay {
    pub fn size<S, B>(
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
        strategy_opts: &S::Opts,
        backend_opts: &B::Opts,
    ) -> usize
    where
        S: CondensingStrategy,
        B: QpBackend,
    {
        align_up(strategy.workspace_size(shapes, strategy_opts))
            + align_up(backend.workspace_size(shapes.condensed, backend_opts))
    }

    /// Compute the overlay. Pure: equal inputs give equal blocks.
    pub fn carve<S, B>(
        strategy: &S,
        backend: &B,
        shapes: ShapePair<'_>,
        strategy_opts: &S::Opts,
        backend_opts: &B::Opts,
    ) -> XcondResult<Self>
    where
        S: CondensingStrategy,
        B: QpBackend,
    {
        let total = Self::size(strategy, backend, shapes, strategy_opts, backend_opts);
        let mut c = Carver::new();
        let strategy_block = c.take(strategy.workspace_size(shapes, strategy_opts));
        let backend_block = c.take(backend.workspace_size(shapes.condensed, backend_opts));
        c.finish(total, "xcond workspace")?;
        Ok(Self {
            strategy: strategy_block,
            backend: backend_block,
            total,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Lay the overlay over `work`, which must hold at least
    /// [`WorkspaceOverlay::total`] bytes.
    pub fn split<'w>(&self, work: &'w mut [u64]) -> XcondResult<[&'w mut [u64]; 2]> {
        if work.len() * ALIGN < self.total {
            return Err(LayoutError::BufferSize {
                required: self.total,
                actual: work.len() * ALIGN,
            }
            .into());
        }
        Ok(split_regions_mut(work, [self.strategy, self.backend])?)
    }
}
