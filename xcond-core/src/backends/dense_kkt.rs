//! Dense KKT backend for equality-constrained OCP-QPs.
//!
//! The stage variables `z = [u_0; x_0; ...; u_N; x_N]` and the dynamics
//! multipliers `l = [pi_0; ...; pi_{N-1}]` solve
//!
//! ```text
//! [H + dI   E^T] [z]   [-g]
//! [E       -dI ] [l] = [-b]
//! ```
//!
//! where each block row of `E` is `B_k u_k + A_k x_k - x_{k+1}`. The
//! regularized matrix is LU-factored in place (partial pivoting) inside the
//! backend's memory region; iterative refinement runs against the
//! unregularized matrix assembled in the workspace.
//!
//! Bounds and general constraints are not handled: such shapes are reported
//! as [`QpStatus::QpFailure`].

use std::time::{Duration, Instant};

use bytemuck::{Pod, Zeroable};
use nalgebra::{DMatrixView, DMatrixViewMut, DVectorView, DVectorViewMut};

use crate::backend::QpBackend;
use crate::dims::QpDims;
use crate::error::{XcondError, XcondResult};
use crate::mem::{
    f64_bytes, f64s_mut, record, record_bytes, record_mut, split_regions_mut, u32_bytes,
    u32s_mut, Block, Carver,
};
use crate::options::OptValue;
use crate::qp::{QpIn, QpOutMut, QpStatus};

pub const DEFAULT_STATIC_REG: f64 = 1e-10;
pub const DEFAULT_REFINE_TOL: f64 = 1e-12;
pub const DEFAULT_REFINE_ITERS: usize = 3;

/// Pivots below this fraction of the largest KKT entry count as zero.
const PIVOT_TOL: f64 = 1e-14;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Dense KKT backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseKktBackend;

impl DenseKktBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Options of [`DenseKktBackend`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DenseKktOpts {
    /// Diagonal shift added to the factored matrix.
    pub static_reg: f64,
    /// Refinement stops once the residual max-norm is below this.
    pub refine_tol: f64,
    /// Maximum refinement steps (`iter_max`, alias `maxiter`).
    pub refine_iters: u64,
    /// Seed refinement from the previous solution instead of a fresh solve.
    pub warm_start: u64,
}

impl DenseKktOpts {
    pub fn refine_iters(&self) -> usize {
        self.refine_iters as usize
    }

    pub fn warm_start(&self) -> bool {
        self.warm_start != 0
    }
}

/// Persistent solver state kept at the front of the memory region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct DenseKktState {
    /// Successful solves since the memory was carved.
    pub solves: u64,
    /// Residual max-norm of the last solution.
    pub residual: f64,
}

/// Block table of the backend's memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseKktMemory {
    nz: usize,
    ne: usize,
    state: Block,
    kkt: Block,
    piv: Block,
    sol: Block,
}

impl DenseKktMemory {
    /// Order of the KKT system.
    pub fn dim(&self) -> usize {
        self.nz + self.ne
    }

    pub fn state(&self, region: &[u64]) -> XcondResult<DenseKktState> {
        Ok(*record::<DenseKktState>(self.state.slice(region)?)?)
    }
}

fn kkt_dim(dims: QpDims<'_>) -> (usize, usize) {
    (dims.total_nv(), dims.total_eq())
}

fn workspace_blocks(nk: usize) -> (Carver, [Block; 3]) {
    let mut c = Carver::new();
    let blocks = [c.take_f64(nk * nk), c.take_f64(nk), c.take_f64(nk)];
    (c, blocks)
}

/// Unregularized KKT matrix and right-hand side.
fn assemble(qp: QpIn<'_>, kkt: &mut [f64], rhs: &mut [f64], nk: usize) {
    let dims = qp.dims();
    kkt.fill(0.0);
    let mut m = DMatrixViewMut::from_slice(kkt, nk, nk);

    let mut zoff = 0;
    let mut eoff = dims.total_nv();
    for k in 0..=dims.n() {
        let nv = dims.stage(k).nv();
        let nx1 = dims.nx_next(k);
        if nv > 0 {
            let rsq = DMatrixView::from_slice(qp.rsq(k), nv, nv);
            m.view_mut((zoff, zoff), (nv, nv)).copy_from(&rsq);
            for (dst, &g) in rhs[zoff..zoff + nv].iter_mut().zip(qp.rq(k)) {
                *dst = -g;
            }
        }
        if nx1 > 0 {
            let ba = DMatrixView::from_slice(qp.ba(k), nx1, nv);
            m.view_mut((eoff, zoff), (nx1, nv)).copy_from(&ba);
            m.view_mut((zoff, eoff), (nv, nx1)).tr_copy_from(&ba);
            let next_x = zoff + nv + dims.stage(k + 1).nu();
            for r in 0..nx1 {
                m[(eoff + r, next_x + r)] = -1.0;
                m[(next_x + r, eoff + r)] = -1.0;
            }
            for (dst, &b) in rhs[eoff..eoff + nx1].iter_mut().zip(qp.b(k)) {
                *dst = -b;
            }
            eoff += nx1;
        }
        zoff += nv;
    }
}

fn regularize(kkt: &mut [f64], nz: usize, nk: usize, reg: f64) {
    for i in 0..nk {
        kkt[i + i * nk] += if i < nz { reg } else { -reg };
    }
}

/// In-place LU with partial pivoting. Returns `false` on a pivot at or below
/// `tol`.
fn lu_factor(a: &mut DMatrixViewMut<'_, f64>, piv: &mut [u32], tol: f64) -> bool {
    let n = a.nrows();
    for j in 0..n {
        let mut p = j;
        let mut pmax = a[(j, j)].abs();
        for i in j + 1..n {
            let v = a[(i, j)].abs();
            if v > pmax {
                p = i;
                pmax = v;
            }
        }
        // Also rejects NaN.
        if !(pmax > tol) {
            return false;
        }
        piv[j] = p as u32;
        if p != j {
            a.swap_rows(j, p);
        }
        let d = a[(j, j)];
        for i in j + 1..n {
            a[(i, j)] /= d;
        }
        for c in j + 1..n {
            let ajc = a[(j, c)];
            if ajc == 0.0 {
                continue;
            }
            for i in j + 1..n {
                let l = a[(i, j)];
                a[(i, c)] -= l * ajc;
            }
        }
    }
    true
}

fn lu_solve(lu: &DMatrixView<'_, f64>, piv: &[u32], x: &mut [f64]) {
    let n = lu.nrows();
    for (j, &p) in piv.iter().enumerate().take(n) {
        x.swap(j, p as usize);
    }
    for j in 0..n {
        let xj = x[j];
        if xj != 0.0 {
            for i in j + 1..n {
                x[i] -= lu[(i, j)] * xj;
            }
        }
    }
    for j in (0..n).rev() {
        x[j] /= lu[(j, j)];
        let xj = x[j];
        for i in 0..j {
            x[i] -= lu[(i, j)] * xj;
        }
    }
}

/// `res = rhs - K sol`, returning its max-norm.
fn residual(kkt: &[f64], rhs: &[f64], sol: &[f64], res: &mut [f64], nk: usize) -> f64 {
    let k = DMatrixView::from_slice(kkt, nk, nk);
    let x = DVectorView::from_slice(sol, nk);
    let mut r = DVectorViewMut::from_slice(res, nk);
    r.copy_from_slice(rhs);
    r.gemv(-1.0, &k, &x, 1.0);
    r.amax()
}

fn record_info(
    qp_out: &mut QpOutMut<'_>,
    num_iter: usize,
    interface: Duration,
    solve: Duration,
    total: Duration,
) -> XcondResult<()> {
    let info = qp_out.info_mut()?;
    info.num_iter = num_iter as u64;
    info.interface_time = interface.as_secs_f64();
    info.solve_qp_time = solve.as_secs_f64();
    info.total_time = total.as_secs_f64();
    info.condensing_time = 0.0;
    info.t_computed = 1;
    Ok(())
}

impl QpBackend for DenseKktBackend {
    type Opts = DenseKktOpts;
    type Memory = DenseKktMemory;

    fn opts_initialize_default(&self, _dims: QpDims<'_>, opts: &mut DenseKktOpts) {
        *opts = DenseKktOpts {
            static_reg: env_or("XCOND_STATIC_REG", DEFAULT_STATIC_REG),
            refine_tol: DEFAULT_REFINE_TOL,
            refine_iters: env_or("XCOND_REFINE_ITERS", DEFAULT_REFINE_ITERS) as u64,
            warm_start: 0,
        };
    }

    fn opts_update(&self, _dims: QpDims<'_>, opts: &mut DenseKktOpts) -> XcondResult<()> {
        if !(opts.static_reg.is_finite() && opts.static_reg >= 0.0) {
            return Err(XcondError::InvalidOption {
                key: "static_reg".to_string(),
                reason: "must be finite and non-negative",
            });
        }
        if !(opts.refine_tol.is_finite() && opts.refine_tol > 0.0) {
            return Err(XcondError::InvalidOption {
                key: "refine_tol".to_string(),
                reason: "must be finite and positive",
            });
        }
        Ok(())
    }

    fn opts_set(&self, opts: &mut DenseKktOpts, key: &str, value: OptValue) -> XcondResult<()> {
        match key {
            "static_reg" => opts.static_reg = value.as_f64(key)?,
            "refine_tol" => opts.refine_tol = value.as_f64(key)?,
            "iter_max" | "maxiter" => opts.refine_iters = value.as_usize(key)? as u64,
            "warm_start" => opts.warm_start = value.as_bool(key)? as u64,
            _ => return Err(XcondError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    fn memory_size(&self, dims: QpDims<'_>, _opts: &DenseKktOpts) -> usize {
        let (nz, ne) = kkt_dim(dims);
        let nk = nz + ne;
        record_bytes::<DenseKktState>(1) + f64_bytes(nk * nk) + u32_bytes(nk) + f64_bytes(nk)
    }

    fn memory_assign(
        &self,
        dims: QpDims<'_>,
        opts: &DenseKktOpts,
        region: &mut [u64],
    ) -> XcondResult<DenseKktMemory> {
        let (nz, ne) = kkt_dim(dims);
        let nk = nz + ne;
        let mut c = Carver::new();
        let state = c.take_record::<DenseKktState>(1);
        let kkt = c.take_f64(nk * nk);
        let piv = c.take_u32(nk);
        let sol = c.take_f64(nk);
        let total = c.finish(self.memory_size(dims, opts), "dense kkt memory")?;

        for block in [state, kkt, piv, sol] {
            block.slice_mut(region)?.fill(0);
        }
        log::debug!("dense kkt memory: order {nk} ({nz} primal, {ne} dual), {total} bytes");
        Ok(DenseKktMemory {
            nz,
            ne,
            state,
            kkt,
            piv,
            sol,
        })
    }

    fn workspace_size(&self, dims: QpDims<'_>, _opts: &DenseKktOpts) -> usize {
        let (nz, ne) = kkt_dim(dims);
        workspace_blocks(nz + ne).0.position()
    }

    fn evaluate(
        &self,
        qp_in: QpIn<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &DenseKktOpts,
        mem: &DenseKktMemory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<QpStatus> {
        let start = Instant::now();
        let dims = qp_in.dims();
        let (nz, ne) = kkt_dim(dims);
        let nk = mem.dim();
        if nz + ne != nk {
            return Err(XcondError::InvalidDimension(format!(
                "KKT order {} does not match memory carved for {nk}",
                nz + ne
            )));
        }

        qp_out.clear_solution();
        if dims.has_inequalities() {
            log::warn!("dense kkt backend cannot handle bounds or general constraints");
            record_info(qp_out, 0, Duration::ZERO, Duration::ZERO, start.elapsed())?;
            return Ok(QpStatus::QpFailure);
        }

        let [state, kkt, piv, sol] =
            split_regions_mut(mem_region, [mem.state, mem.kkt, mem.piv, mem.sol])?;
        let (_, wblocks) = workspace_blocks(nk);
        let [kkt0, rhs, res] = split_regions_mut(work, wblocks)?;

        let state = record_mut::<DenseKktState>(state)?;
        let kkt = &mut f64s_mut(kkt)[..nk * nk];
        let piv = &mut u32s_mut(piv)[..nk];
        let sol = &mut f64s_mut(sol)[..nk];
        let kkt0 = &mut f64s_mut(kkt0)[..nk * nk];
        let rhs = &mut f64s_mut(rhs)[..nk];
        let res = &mut f64s_mut(res)[..nk];

        assemble(qp_in, kkt0, rhs, nk);
        kkt.copy_from_slice(kkt0);
        regularize(kkt, nz, nk, opts.static_reg);
        let interface = start.elapsed();

        let solve_start = Instant::now();
        let scale = kkt0.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let factored = lu_factor(
            &mut DMatrixViewMut::from_slice(&mut *kkt, nk, nk),
            piv,
            PIVOT_TOL * scale,
        );
        if !factored {
            log::warn!("dense kkt backend: singular KKT system of order {nk}");
            state.solves = 0;
            record_info(qp_out, 0, interface, solve_start.elapsed(), start.elapsed())?;
            return Ok(QpStatus::QpFailure);
        }

        let lu = DMatrixView::from_slice(&*kkt, nk, nk);
        let warm = opts.warm_start() && state.solves > 0;
        let mut solves = 0;
        if !warm {
            sol.copy_from_slice(rhs);
            lu_solve(&lu, piv, sol);
            solves = 1;
        }
        let mut resid = residual(kkt0, rhs, sol, res, nk);
        for _ in 0..opts.refine_iters() + usize::from(warm) {
            if resid <= opts.refine_tol {
                break;
            }
            lu_solve(&lu, piv, res);
            for (x, d) in sol.iter_mut().zip(res.iter()) {
                *x += d;
            }
            solves += 1;
            resid = residual(kkt0, rhs, sol, res, nk);
        }
        let solve = solve_start.elapsed();

        let finite = sol.iter().all(|v| v.is_finite());
        state.solves = if finite { state.solves + 1 } else { 0 };
        state.residual = resid;

        let mut zoff = 0;
        let mut eoff = nz;
        for k in 0..=dims.n() {
            let nv = dims.stage(k).nv();
            let nx1 = dims.nx_next(k);
            qp_out.ux_mut(k).copy_from_slice(&sol[zoff..zoff + nv]);
            qp_out.pi_mut(k).copy_from_slice(&sol[eoff..eoff + nx1]);
            zoff += nv;
            eoff += nx1;
        }
        record_info(qp_out, solves, interface, solve, start.elapsed())?;

        if !finite {
            return Ok(QpStatus::NanDetected);
        }
        Ok(QpStatus::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::StageDims;
    use crate::mem::Arena;
    use crate::qp::{OcpQpIn, OcpQpOut};

    struct Fixture {
        opts: DenseKktOpts,
        mem: DenseKktMemory,
        mem_arena: Arena,
        work: Arena,
    }

    fn fixture(dims: QpDims<'_>) -> Fixture {
        let b = DenseKktBackend;
        let mut opts = DenseKktOpts::zeroed();
        b.opts_initialize_default(dims, &mut opts);
        opts.refine_iters = 3;
        opts.static_reg = DEFAULT_STATIC_REG;
        b.opts_update(dims, &mut opts).unwrap();
        let mut mem_arena = Arena::new(b.memory_size(dims, &opts));
        let mem = b.memory_assign(dims, &opts, mem_arena.words_mut()).unwrap();
        let work = Arena::new(b.workspace_size(dims, &opts));
        Fixture {
            opts,
            mem,
            mem_arena,
            work,
        }
    }

    /// min 0.5 (u0^2 + x0^2 + x1^2) - x1  s.t.  x1 = u0 + x0
    fn two_stage() -> (Vec<StageDims>, OcpQpIn) {
        let stages = vec![StageDims::new(1, 1), StageDims::new(1, 0)];
        let mut qp = OcpQpIn::new(QpDims::new(&stages)).unwrap();
        {
            let mut v = qp.view_mut();
            v.rsq_mut(0).copy_from_slice(&[1.0, 0.0, 0.0, 1.0]);
            v.ba_mut(0).copy_from_slice(&[1.0, 1.0]);
            v.rsq_mut(1).copy_from_slice(&[1.0]);
            v.rq_mut(1).copy_from_slice(&[-1.0]);
        }
        (stages, qp)
    }

    #[test]
    fn test_solves_two_stage_problem() {
        let (stages, qp) = two_stage();
        let dims = QpDims::new(&stages);
        let mut f = fixture(dims);
        let mut out = OcpQpOut::new(dims).unwrap();
        let status = DenseKktBackend
            .evaluate(
                qp.view(),
                &mut out.view_mut(),
                &f.opts,
                &f.mem,
                f.mem_arena.words_mut(),
                f.work.words_mut(),
            )
            .unwrap();
        assert_eq!(status, QpStatus::Success);
        let v = out.view();
        assert!((v.ux(0)[0] - 1.0 / 3.0).abs() < 1e-10);
        assert!((v.ux(0)[1] - 1.0 / 3.0).abs() < 1e-10);
        assert!((v.ux(1)[0] - 2.0 / 3.0).abs() < 1e-10);
        assert!((v.pi(0)[0] + 1.0 / 3.0).abs() < 1e-10);
        assert!(out.info().num_iter() >= 1);
        assert!(out.info().t_computed());
        assert_eq!(f.mem.state(f.mem_arena.words()).unwrap().solves, 1);
    }

    #[test]
    fn test_warm_start_reuses_previous_solution() {
        let (stages, qp) = two_stage();
        let dims = QpDims::new(&stages);
        let mut f = fixture(dims);
        f.opts.warm_start = 1;
        let mut out = OcpQpOut::new(dims).unwrap();
        for _ in 0..2 {
            let status = DenseKktBackend
                .evaluate(
                    qp.view(),
                    &mut out.view_mut(),
                    &f.opts,
                    &f.mem,
                    f.mem_arena.words_mut(),
                    f.work.words_mut(),
                )
                .unwrap();
            assert_eq!(status, QpStatus::Success);
        }
        assert!((out.view().ux(1)[0] - 2.0 / 3.0).abs() < 1e-10);
        assert_eq!(f.mem.state(f.mem_arena.words()).unwrap().solves, 2);
    }

    #[test]
    fn test_inequalities_are_a_failure_status() {
        let mut s0 = StageDims::new(1, 1);
        s0.nbu = 1;
        let stages = [s0];
        let dims = QpDims::new(&stages);
        let mut f = fixture(dims);
        let qp = OcpQpIn::new(dims).unwrap();
        let mut out = OcpQpOut::new(dims).unwrap();
        let status = DenseKktBackend
            .evaluate(
                qp.view(),
                &mut out.view_mut(),
                &f.opts,
                &f.mem,
                f.mem_arena.words_mut(),
                f.work.words_mut(),
            )
            .unwrap();
        assert_eq!(status, QpStatus::QpFailure);
    }

    #[test]
    fn test_singular_kkt_is_a_failure_status() {
        let stages = [StageDims::new(2, 0)];
        let dims = QpDims::new(&stages);
        let mut f = fixture(dims);
        f.opts.static_reg = 0.0;
        let qp = OcpQpIn::new(dims).unwrap();
        let mut out = OcpQpOut::new(dims).unwrap();
        let status = DenseKktBackend
            .evaluate(
                qp.view(),
                &mut out.view_mut(),
                &f.opts,
                &f.mem,
                f.mem_arena.words_mut(),
                f.work.words_mut(),
            )
            .unwrap();
        assert_eq!(status, QpStatus::QpFailure);
        assert_eq!(status.code(), 4);
    }

    #[test]
    fn test_option_keys() {
        let b = DenseKktBackend;
        let mut opts = DenseKktOpts::zeroed();
        b.opts_set(&mut opts, "maxiter", OptValue::from(50)).unwrap();
        assert_eq!(opts.refine_iters(), 50);
        b.opts_set(&mut opts, "iter_max", OptValue::from(7)).unwrap();
        assert_eq!(opts.refine_iters(), 7);
        b.opts_set(&mut opts, "warm_start", OptValue::from(true)).unwrap();
        assert!(opts.warm_start());
        assert!(matches!(
            b.opts_set(&mut opts, "mu0", OptValue::from(1.0)),
            Err(XcondError::UnknownOption(_))
        ));
        opts.refine_tol = -1.0;
        let stages = [StageDims::new(1, 0)];
        assert!(b.opts_update(QpDims::new(&stages), &mut opts).is_err());
    }
}
