//! Condensing strategy capability.
//!
//! A strategy rewrites an OCP-QP into a smaller equivalent one and maps the
//! smaller problem's solution back. It owns the representation of the
//! condensed shape; everyone else reaches that shape through
//! [`CondensingStrategy::dims_get`].

use std::fmt;

use bytemuck::Pod;

use crate::dims::{DimField, QpDims};
use crate::error::XcondResult;
use crate::mem::record_bytes;
use crate::options::OptValue;
use crate::qp::{QpIn, QpInMut, QpOut, QpOutMut};

/// Key under which a strategy publishes its condensed shape.
pub const CONDENSED_DIMS: &str = "xcond_dims";

/// Key under which a strategy publishes the original shape it tracks.
pub const ORIGINAL_DIMS: &str = "orig_dims";

/// Original and condensed shapes handed to a strategy's sizing calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapePair<'a> {
    pub original: QpDims<'a>,
    pub condensed: QpDims<'a>,
}

/// Condensing capability.
///
/// Every `*_size` must agree with the matching `*_assign`: the assign call
/// receives a region of exactly the reported size and must carve all of it.
/// Regions are word slices; block offsets a strategy records are relative to
/// the region it was handed.
pub trait CondensingStrategy {
    /// Module tag routing `"<TAG>_<option>"` keys to this strategy.
    const TAG: &'static str = "cond";

    /// Block table of the condensed-shape record.
    type Dims: Clone + fmt::Debug;
    /// Options record.
    type Opts: Pod + fmt::Debug;
    /// Block table of the persistent memory region.
    type Memory: Clone + fmt::Debug;

    fn dims_size(&self, n: usize) -> usize;

    fn dims_assign(&self, n: usize, region: &mut [u64]) -> XcondResult<Self::Dims>;

    /// Mirror a change to the original shape into the condensed record.
    fn dims_set(
        &self,
        dims: &Self::Dims,
        region: &mut [u64],
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()>;

    /// Keyed accessor for shapes held in the strategy's record.
    fn dims_get<'a>(
        &self,
        dims: &Self::Dims,
        region: &'a [u64],
        key: &str,
    ) -> XcondResult<QpDims<'a>>;

    fn opts_size(&self, _shapes: ShapePair<'_>) -> usize {
        record_bytes::<Self::Opts>(1)
    }

    fn opts_initialize_default(&self, shapes: ShapePair<'_>, opts: &mut Self::Opts);

    /// Recompute derived option state after setters ran.
    fn opts_update(&self, shapes: ShapePair<'_>, opts: &mut Self::Opts) -> XcondResult<()>;

    /// Set one option; `key` arrives with the module tag stripped.
    fn opts_set(&self, opts: &mut Self::Opts, key: &str, value: OptValue) -> XcondResult<()>;

    fn memory_size(&self, shapes: ShapePair<'_>, opts: &Self::Opts) -> usize;

    fn memory_assign(
        &self,
        shapes: ShapePair<'_>,
        opts: &Self::Opts,
        region: &mut [u64],
    ) -> XcondResult<Self::Memory>;

    fn workspace_size(&self, shapes: ShapePair<'_>, opts: &Self::Opts) -> usize;

    /// Original problem into the condensed input record.
    fn condense(
        &self,
        qp_in: QpIn<'_>,
        cond_in: &mut QpInMut<'_>,
        opts: &Self::Opts,
        mem: &Self::Memory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<()>;

    /// Condensed solution onto the original output record.
    fn expand(
        &self,
        cond_out: QpOut<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &Self::Memory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<()>;
}
