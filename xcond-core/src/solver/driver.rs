//! Pipeline driver.

use std::mem::size_of;
use std::time::Instant;

use super::dims::XcondDims;
use super::memory::{MemoryParts, XcondMemory};
use super::opts::XcondOpts;
use super::workspace::WorkspaceOverlay;
use super::OcpQpSolver;
use crate::backend::QpBackend;
use crate::diagnostics::DiagnosticsConfig;
use crate::dims::DimField;
use crate::error::{XcondError, XcondResult};
use crate::mem::Arena;
use crate::options::{OptValue, OptionRouter};
use crate::qp::{QpIn, QpInfo, QpOutMut, QpStatus};
use crate::strategy::CondensingStrategy;
use crate::timing::{Phase, PhaseTimers};

/// Condensing OCP-QP solver: strategy `S` in front of backend `B`.
#[derive(Debug, Clone)]
pub struct XcondSolver<S, B> {
    strategy: S,
    backend: B,
    router: OptionRouter,
    diagnostics: DiagnosticsConfig,
}

impl<S: CondensingStrategy, B: QpBackend> XcondSolver<S, B> {
    pub fn new(strategy: S, backend: B) -> Self {
        Self {
            strategy,
            backend,
            router: OptionRouter::new(S::TAG),
            diagnostics: DiagnosticsConfig::from_env(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Bytes of the solver value itself, sub-modules included.
    pub fn config_size() -> usize {
        size_of::<Self>()
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn router(&self) -> &OptionRouter {
        &self.router
    }

    /// Overlay the current solve would use for a memory carved with `opts`.
    pub fn workspace_overlay(
        &self,
        opts: &XcondOpts<S::Opts, B::Opts>,
        mem: &XcondMemory<S::Memory, B::Memory>,
    ) -> XcondResult<WorkspaceOverlay> {
        WorkspaceOverlay::carve(
            &self.strategy,
            &self.backend,
            mem.shapes(),
            opts.strategy()?,
            opts.backend()?,
        )
    }

    /// Common prologue of both solve entry points: shape check, header check,
    /// epoch bump, workspace overlay.
    fn begin<'m, 'w>(
        &self,
        qp_in: &QpIn<'_>,
        qp_out: &QpOutMut<'_>,
        opts: &XcondOpts<S::Opts, B::Opts>,
        mem: &'m mut XcondMemory<S::Memory, B::Memory>,
        work: &'w mut [u64],
    ) -> XcondResult<(MemoryParts<'m, S::Memory, B::Memory>, [&'w mut [u64]; 2])> {
        mem.check_original(qp_in.dims(), qp_out.dims())?;
        let overlay = self.workspace_overlay(opts, mem)?;
        let work = overlay.split(work)?;
        Ok((mem.begin_solve()?, work))
    }
}

impl<S: CondensingStrategy, B: QpBackend> OcpQpSolver for XcondSolver<S, B> {
    type Dims = XcondDims<S::Dims>;
    type Opts = XcondOpts<S::Opts, B::Opts>;
    type Memory = XcondMemory<S::Memory, B::Memory>;

    fn dims_size(&self, n: usize) -> usize {
        XcondDims::<S::Dims>::size(&self.strategy, n)
    }

    fn dims_assign(&self, n: usize, arena: Arena) -> XcondResult<Self::Dims> {
        XcondDims::assign(&self.strategy, n, arena)
    }

    fn dims_set(
        &self,
        dims: &mut Self::Dims,
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()> {
        dims.set(&self.strategy, stage, field, value)
    }

    fn opts_size(&self, dims: &Self::Dims) -> XcondResult<usize> {
        Ok(XcondOpts::<S::Opts, B::Opts>::size(
            &self.strategy,
            &self.backend,
            dims.shapes(&self.strategy)?,
        ))
    }

    fn opts_assign(&self, dims: &Self::Dims, arena: Arena) -> XcondResult<Self::Opts> {
        XcondOpts::assign(
            &self.strategy,
            &self.backend,
            dims.shapes(&self.strategy)?,
            arena,
        )
    }

    fn opts_initialize_default(
        &self,
        dims: &Self::Dims,
        opts: &mut Self::Opts,
    ) -> XcondResult<()> {
        opts.initialize_default(&self.strategy, &self.backend, dims.shapes(&self.strategy)?)
    }

    fn opts_update(&self, dims: &Self::Dims, opts: &mut Self::Opts) -> XcondResult<()> {
        opts.update(&self.strategy, &self.backend, dims.shapes(&self.strategy)?)
    }

    fn opts_set(&self, opts: &mut Self::Opts, key: &str, value: OptValue) -> XcondResult<()> {
        opts.set(&self.router, &self.strategy, &self.backend, key, value)
    }

    fn memory_size(&self, dims: &Self::Dims, opts: &Self::Opts) -> XcondResult<usize> {
        Ok(XcondMemory::<S::Memory, B::Memory>::size(
            &self.strategy,
            &self.backend,
            dims.shapes(&self.strategy)?,
            opts.strategy()?,
            opts.backend()?,
        ))
    }

    fn memory_assign(
        &self,
        dims: &Self::Dims,
        opts: &Self::Opts,
        arena: Arena,
    ) -> XcondResult<Self::Memory> {
        XcondMemory::assign(
            &self.strategy,
            &self.backend,
            dims.shapes(&self.strategy)?,
            opts.strategy()?,
            opts.backend()?,
            arena,
        )
    }

    fn workspace_size(&self, dims: &Self::Dims, opts: &Self::Opts) -> XcondResult<usize> {
        Ok(WorkspaceOverlay::size(
            &self.strategy,
            &self.backend,
            dims.shapes(&self.strategy)?,
            opts.strategy()?,
            opts.backend()?,
        ))
    }

    fn evaluate(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &mut Self::Memory,
        work: &mut [u64],
    ) -> XcondResult<QpStatus> {
        let start = Instant::now();
        let mut timers = PhaseTimers::default();
        let (strategy_opts, backend_opts) = (opts.strategy()?, opts.backend()?);
        let (mut parts, [strategy_work, backend_work]) =
            self.begin(&qp_in, qp_out, opts, mem, work)?;

        {
            let _t = timers.scoped(Phase::Condense);
            self.strategy.condense(
                qp_in,
                &mut parts.cond_in,
                strategy_opts,
                parts.strategy,
                parts.strategy_region,
                strategy_work,
            )?;
        }

        let status = {
            let _t = timers.scoped(Phase::Solve);
            self.backend.evaluate(
                parts.cond_in.as_ref(),
                &mut parts.cond_out,
                backend_opts,
                parts.backend,
                parts.backend_region,
                backend_work,
            )?
        };
        if !status.is_success() {
            log::warn!(
                "QP backend returned {status} (code {}) on solve {}",
                status.code(),
                parts.epoch
            );
        }

        // Expand runs on whatever the backend left behind.
        {
            let _t = timers.scoped(Phase::Expand);
            self.strategy.expand(
                parts.cond_out.as_ref(),
                qp_out,
                strategy_opts,
                parts.strategy,
                parts.strategy_region,
                strategy_work,
            )?;
        }

        let cond_info = parts.cond_out.as_ref().info();
        let info = qp_out.info_mut()?;
        *info = QpInfo {
            condensing_time: timers.condensing_secs(),
            solve_qp_time: cond_info.solve_qp_time,
            interface_time: cond_info.interface_time,
            total_time: start.elapsed().as_secs_f64(),
            num_iter: cond_info.num_iter,
            t_computed: cond_info.t_computed,
        };

        if self.diagnostics.should_log(parts.epoch) {
            log::info!(
                "solve {}: status={} iters={} condense={:.3e}s solve={:.3e}s expand={:.3e}s total={:.3e}s",
                parts.epoch,
                status,
                info.num_iter,
                timers.condense.as_secs_f64(),
                timers.solve.as_secs_f64(),
                timers.expand.as_secs_f64(),
                info.total_time
            );
        }

        Ok(status)
    }

    fn evaluate_sensitivity(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &Self::Opts,
        mem: &mut Self::Memory,
        work: &mut [u64],
    ) -> XcondResult<QpStatus> {
        let strategy_opts = opts.strategy()?;
        let (mut parts, [strategy_work, _]) = self.begin(&qp_in, qp_out, opts, mem, work)?;
        self.strategy.condense(
            qp_in,
            &mut parts.cond_in,
            strategy_opts,
            parts.strategy,
            parts.strategy_region,
            strategy_work,
        )?;
        log::warn!("sensitivity evaluation requested; condensed problem prepared but not solved");
        Err(XcondError::Unsupported("sensitivity evaluation"))
    }
}
