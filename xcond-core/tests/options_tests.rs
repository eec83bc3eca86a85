//! Option routing through the composed solver.

use std::cell::RefCell;

use xcond_core::backends::{DenseKktMemory, DenseKktOpts};
use xcond_core::condensing::{IdentityDims, IdentityMemory, IdentityOpts};
use xcond_core::{
    Arena, CondensingStrategy, DenseKktBackend, DimField, IdentityCondensing, OcpQpSolver,
    OptValue, QpBackend, QpDims, QpIn, QpInMut, QpOut, QpOutMut, QpStatus, ShapePair, XcondError,
    XcondResult, XcondSolver,
};

/// Identity condensing that records every option it is handed.
#[derive(Debug, Default)]
struct RecordingStrategy {
    inner: IdentityCondensing,
    calls: RefCell<Vec<(String, OptValue)>>,
}

impl CondensingStrategy for RecordingStrategy {
    type Dims = IdentityDims;
    type Opts = IdentityOpts;
    type Memory = IdentityMemory;

    fn dims_size(&self, n: usize) -> usize {
        self.inner.dims_size(n)
    }

    fn dims_assign(&self, n: usize, region: &mut [u64]) -> XcondResult<IdentityDims> {
        self.inner.dims_assign(n, region)
    }

    fn dims_set(
        &self,
        dims: &IdentityDims,
        region: &mut [u64],
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()> {
        self.inner.dims_set(dims, region, stage, field, value)
    }

    fn dims_get<'a>(
        &self,
        dims: &IdentityDims,
        region: &'a [u64],
        key: &str,
    ) -> XcondResult<QpDims<'a>> {
        self.inner.dims_get(dims, region, key)
    }

    fn opts_initialize_default(&self, shapes: ShapePair<'_>, opts: &mut IdentityOpts) {
        self.inner.opts_initialize_default(shapes, opts)
    }

    fn opts_update(&self, shapes: ShapePair<'_>, opts: &mut IdentityOpts) -> XcondResult<()> {
        self.inner.opts_update(shapes, opts)
    }

    fn opts_set(&self, _opts: &mut IdentityOpts, key: &str, value: OptValue) -> XcondResult<()> {
        self.calls.borrow_mut().push((key.to_string(), value));
        Ok(())
    }

    fn memory_size(&self, shapes: ShapePair<'_>, opts: &IdentityOpts) -> usize {
        self.inner.memory_size(shapes, opts)
    }

    fn memory_assign(
        &self,
        shapes: ShapePair<'_>,
        opts: &IdentityOpts,
        region: &mut [u64],
    ) -> XcondResult<IdentityMemory> {
        self.inner.memory_assign(shapes, opts, region)
    }

    fn workspace_size(&self, shapes: ShapePair<'_>, opts: &IdentityOpts) -> usize {
        self.inner.workspace_size(shapes, opts)
    }

    fn condense(
        &self,
        qp_in: QpIn<'_>,
        cond_in: &mut QpInMut<'_>,
        opts: &IdentityOpts,
        mem: &IdentityMemory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<()> {
        self.inner.condense(qp_in, cond_in, opts, mem, mem_region, work)
    }

    fn expand(
        &self,
        cond_out: QpOut<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &IdentityOpts,
        mem: &IdentityMemory,
        mem_region: &mut [u64],
        work: &mut [u64],
    ) -> XcondResult<()> {
        self.inner.expand(cond_out, qp_out, opts, mem, mem_region, work)
    }
}

/// Dense backend that records every option before applying it.
#[derive(Debug, Default)]
struct RecordingBackend {
    inner: DenseKktBackend,
    calls: RefCell<Vec<(String, OptValue)>>,
}

impl QpBackend for RecordingBackend {
    type Opts = DenseKktOpts;
    type Memory = DenseKktMemory;

    fn opts_initialize_default(&self, dims: QpDims<'_>, opts: &mut DenseKktOpts) {
        self.inner.opts_initialize_default(dims, opts)
    }

    fn opts_update(&self, dims: QpDims<'_>, opts: &mut DenseKktOpts) -> XcondResult<()> {
        self.inner.opts_update(dims, opts)
    }

    fn opts_set(&self, opts: &mut DenseKktOpts, key: &str, value: OptValue) -> XcondResult<()> {
        self.calls.borrow_mut().push((key.to_string(), value));
        self.inner.opts_set(opts, key, value)
    }

    fn memory_size(&self, dims: QpDims<'_>, opts: &DenseKktOpts) -> usize {
        self.inner.memory_size(dims, opts)
    }

    fn memory_assign(
        &self,
        dims: QpDims<'_>,
        opts: &DenseKktOpts,
        region: &mut [u64],
    ) -> XcondResult<DenseKktMemory> {
        self.inner.memory_assign(dims, opts, region)
    }

    fn workspace_size(&self, dims: QpDims<'_>, opts: &DenseKktOpts) -> usize {
        self.inner.workspace_size(dims, opts)
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
        self.inner.evaluate(qp_in, qp_out, opts, mem, mem_region, work)
    }
}

type Recording = XcondSolver<RecordingStrategy, RecordingBackend>;

fn recording() -> (
    Recording,
    <Recording as OcpQpSolver>::Dims,
    <Recording as OcpQpSolver>::Opts,
) {
    let solver = XcondSolver::new(RecordingStrategy::default(), RecordingBackend::default());
    let mut dims = solver.dims_assign(1, Arena::new(solver.dims_size(1))).unwrap();
    for (k, nx, nu) in [(0, 2, 1), (1, 2, 0)] {
        solver.dims_set(&mut dims, k, DimField::Nx, nx).unwrap();
        solver.dims_set(&mut dims, k, DimField::Nu, nu).unwrap();
    }
    let mut opts = solver
        .opts_assign(&dims, Arena::new(solver.opts_size(&dims).unwrap()))
        .unwrap();
    solver.opts_initialize_default(&dims, &mut opts).unwrap();
    (solver, dims, opts)
}

#[test]
fn test_strategy_key_is_stripped() {
    let (solver, _, mut opts) = recording();
    solver.opts_set(&mut opts, "cond_tol", 1e-6.into()).unwrap();

    let calls = solver.strategy().calls.borrow();
    assert_eq!(calls.as_slice(), &[("tol".to_string(), OptValue::Float(1e-6))]);
    assert!(solver.backend().calls.borrow().is_empty());
}

#[test]
fn test_backend_key_is_forwarded_whole() {
    let (solver, _, mut opts) = recording();
    solver.opts_set(&mut opts, "maxiter", 50.into()).unwrap();
    solver.opts_set(&mut opts, "static_reg", 1e-8.into()).unwrap();

    let calls = solver.backend().calls.borrow();
    assert_eq!(
        calls.as_slice(),
        &[
            ("maxiter".to_string(), OptValue::Int(50)),
            ("static_reg".to_string(), OptValue::Float(1e-8)),
        ]
    );
    assert!(solver.strategy().calls.borrow().is_empty());
    assert_eq!(opts.backend().unwrap().refine_iters(), 50);
    assert_eq!(opts.backend().unwrap().static_reg, 1e-8);
}

#[test]
fn test_unknown_backend_key_is_the_backends_to_reject() {
    let (solver, _, mut opts) = recording();
    let err = solver
        .opts_set(&mut opts, "qp_tol_stat", 1e-6.into())
        .unwrap_err();
    assert!(matches!(err, XcondError::UnknownOption(k) if k == "qp_tol_stat"));
    assert_eq!(solver.backend().calls.borrow().len(), 1);
}

#[test]
fn test_malformed_keys_reach_nobody() {
    let (solver, _, mut opts) = recording();
    for key in ["", "_", "_x", "cond", "cond_"] {
        let err = solver.opts_set(&mut opts, key, 1.into()).unwrap_err();
        assert!(
            matches!(err, XcondError::InvalidOption { .. }),
            "key {key:?} gave {err:?}"
        );
    }
    assert!(solver.strategy().calls.borrow().is_empty());
    assert!(solver.backend().calls.borrow().is_empty());
}

#[test]
fn test_defaults_and_update_on_real_modules() {
    let solver = XcondSolver::new(IdentityCondensing::new(), DenseKktBackend::new());
    let mut dims = solver.dims_assign(2, Arena::new(solver.dims_size(2))).unwrap();
    for k in 0..=2 {
        solver.dims_set(&mut dims, k, DimField::Nx, 1).unwrap();
    }
    let mut opts = solver
        .opts_assign(&dims, Arena::new(solver.opts_size(&dims).unwrap()))
        .unwrap();
    solver.opts_initialize_default(&dims, &mut opts).unwrap();
    assert_eq!(opts.strategy().unwrap().n2, 2);
    assert!(opts.strategy().unwrap().expand_dual_sol());
    assert!(!opts.backend().unwrap().warm_start());
    solver.opts_update(&dims, &mut opts).unwrap();

    solver
        .opts_set(&mut opts, "cond_expand_dual_sol", false.into())
        .unwrap();
    assert!(!opts.strategy().unwrap().expand_dual_sol());

    solver.opts_set(&mut opts, "cond_n2", 1.into()).unwrap();
    assert!(matches!(
        solver.opts_update(&dims, &mut opts),
        Err(XcondError::InvalidOption { .. })
    ));

    assert!(matches!(
        solver.opts_set(&mut opts, "cond_n2", true.into()),
        Err(XcondError::OptionType { .. })
    ));
}
