//! QP backend capability.

use std::fmt;

use bytemuck::Pod;

use crate::dims::QpDims;
use crate::error::XcondResult;
use crate::mem::record_bytes;
use crate::options::OptValue;
use crate::qp::{QpIn, QpOutMut, QpStatus};

/// Numerical QP solver over the condensed shape.
///
/// Sizing follows the same contract as
/// [`CondensingStrategy`](crate::strategy::CondensingStrategy): every
/// `*_size` matches what the paired `*_assign` carves, and all shapes handed
/// in are the condensed shape obtained through the strategy's keyed accessor.
pub trait QpBackend {
    /// Options record.
    type Opts: Pod + fmt::Debug;
    /// Block table of the persistent memory region.
    type Memory: Clone + fmt::Debug;

    fn opts_size(&self, _dims: QpDims<'_>) -> usize {
        record_bytes::<Self::Opts>(1)
    }

    fn opts_initialize_default(&self, dims: QpDims<'_>, opts: &mut Self::Opts);

    fn opts_update(&self, dims: QpDims<'_>, opts: &mut Self::Opts) -> XcondResult<()>;

    /// Set one option; `key` is the full key as the caller wrote it.
    fn opts_set(&self, opts: &mut Self::Opts, key: &str, value: OptValue) -> XcondResult<()>;

    fn memory_size(&self, dims: QpDims<'_>, opts: &Self::Opts) -> usize;

    fn memory_assign(
        &self,
        dims: QpDims<'_>,
        opts: &Self::Opts,
        region: &mut [u64],
    ) -> XcondResult<Self::Memory>;

    fn workspace_size(&self, dims: QpDims<'_>, opts: &Self::Opts) -> usize;

    /// Solve `qp_in` into `qp_out`.
    ///
    /// Iteration count and timings go into `qp_out`'s info record. Numerical
    /// trouble is a status, not an error; errors are reserved for faults in
    /// the handed-in memory.
    fn evaluate(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &Self::Memory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<QpStatus>;
}
