//! Solver composition: the capability table and its condensing
//! implementation.
//!
//! [`OcpQpSolver`] is the uniform table callers program against. Its one
//! implementation here, [`XcondSolver`], composes a [`CondensingStrategy`]
//! with a [`QpBackend`] and drives condense, solve and expand over memory
//! carved once up front.
//!
//! [`CondensingStrategy`]: crate::strategy::CondensingStrategy
//! [`QpBackend`]: crate::backend::QpBackend

mod dims;
mod driver;
mod memory;
mod opts;
mod workspace;

pub use dims::{XcondDims, DIMS_TAG};
pub use driver::XcondSolver;
pub use memory::{MemoryLayout, XcondMemory, MEMORY_TAG};
pub use opts::{XcondOpts, OPTS_TAG};
pub use workspace::WorkspaceOverlay;

use crate::dims::DimField;
use crate::error::XcondResult;
use crate::mem::Arena;
use crate::options::OptValue;
use crate::qp::{QpIn, QpOutMut, QpStatus};

/// Capability table of an OCP-QP solver.
///
/// Sizing comes first: each `*_size` reports the bytes the matching
/// `*_assign` needs, the caller allocates an [`Arena`] of exactly that size
/// once, and `*_assign` takes ownership of it. Nothing on the `evaluate`
/// path allocates.
pub trait OcpQpSolver {
    type Dims;
    type Opts;
    type Memory;

    fn dims_size(&self, n: usize) -> usize;

    fn dims_assign(&self, n: usize, arena: Arena) -> XcondResult<Self::Dims>;

    fn dims_set(
        &self,
        dims: &mut Self::Dims,
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()>;

    fn opts_size(&self, dims: &Self::Dims) -> XcondResult<usize>;

    fn opts_assign(&self, dims: &Self::Dims, arena: Arena) -> XcondResult<Self::Opts>;

    fn opts_initialize_default(&self, dims: &Self::Dims, opts: &mut Self::Opts)
        -> XcondResult<()>;

    fn opts_update(&self, dims: &Self::Dims, opts: &mut Self::Opts) -> XcondResult<()>;

    fn opts_set(&self, opts: &mut Self::Opts, key: &str, value: OptValue) -> XcondResult<()>;

    fn memory_size(&self, dims: &Self::Dims, opts: &Self::Opts) -> XcondResult<usize>;

    fn memory_assign(
        &self,
        dims: &Self::Dims,
        opts: &Self::Opts,
        arena: Arena,
    ) -> XcondResult<Self::Memory>;

    fn workspace_size(&self, dims: &Self::Dims, opts: &Self::Opts) -> XcondResult<usize>;

    /// Solve `qp_in` into `qp_out`.
    ///
    /// The returned status is the backend's, verbatim; check it before
    /// trusting `qp_out`.
    fn evaluate(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &mut Self::Memory,
        work: &mut [u64],
    ) -> XcondResult<QpStatus>;

    fn evaluate_sensitivity(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &mut Self::Memory,
        work: &mut [u64],
    ) -> XcondResult<QpStatus>;
}
