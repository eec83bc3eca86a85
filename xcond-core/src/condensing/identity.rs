//! Identity condensing.
//!
//! Keeps every stage, so the condensed problem has the original shape. The
//! strategy still goes through the full contract: it owns a copy of both
//! shapes, publishes them through the keyed accessor, and moves data through
//! a stage map held in its memory region. It is the strategy to pair with a
//! backend that already works on the stage-wise problem, and the baseline
//! against which real condensing is checked.

use bytemuck::{Pod, Zeroable};

use crate::dims::{set_stage_field, DimField, QpDims};
use crate::error::{XcondError, XcondResult};
use crate::mem::{u32_bytes, u32s, u32s_mut, Block, Carver};
use crate::options::OptValue;
use crate::qp::{QpIn, QpInMut, QpOut, QpOutMut};
use crate::strategy::{CondensingStrategy, ShapePair, CONDENSED_DIMS, ORIGINAL_DIMS};

/// Identity condensing strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCondensing;

impl IdentityCondensing {
    pub fn new() -> Self {
        Self
    }
}

/// Options of [`IdentityCondensing`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct IdentityOpts {
    /// Stages of the condensed problem; must equal `N`.
    pub n2: u64,
    /// Copy multipliers back to the original output (zeroed otherwise).
    pub expand_dual_sol: u64,
}

impl IdentityOpts {
    pub fn expand_dual_sol(&self) -> bool {
        self.expand_dual_sol != 0
    }
}

/// Block table of the strategy's shape record: original, then condensed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDims {
    n: usize,
    orig: Block,
    cond: Block,
}

impl IdentityDims {
    pub fn n(&self) -> usize {
        self.n
    }
}

/// Block table of the strategy's memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityMemory {
    stage_map: Block,
}

impl IdentityMemory {
    /// Condensed stage `k` comes from original stage `map[k]`.
    pub fn stage_map<'a>(&self, region: &'a [u64]) -> XcondResult<&'a [u32]> {
        let words = self.stage_map.slice(region)?;
        Ok(&u32s(words)[..self.stage_map.len / std::mem::size_of::<u32>()])
    }
}

fn same_shape(a: QpDims<'_>, b: QpDims<'_>, what: &str) -> XcondResult<()> {
    if a != b {
        return Err(XcondError::InvalidDimension(format!(
            "{what}: identity condensing needs equal shapes, got {a:?} and {b:?}"
        )));
    }
    Ok(())
}

impl CondensingStrategy for IdentityCondensing {
    type Dims = IdentityDims;
    type Opts = IdentityOpts;
    type Memory = IdentityMemory;

    fn dims_size(&self, n: usize) -> usize {
        2 * QpDims::size(n)
    }

    fn dims_assign(&self, n: usize, region: &mut [u64]) -> XcondResult<IdentityDims> {
        let mut c = Carver::new();
        let orig = c.take(QpDims::size(n));
        let cond = c.take(QpDims::size(n));
        c.finish(self.dims_size(n), "identity dims")?;
        // Zero the record so an unset shape reads as empty stages.
        orig.slice_mut(region)?.fill(0);
        cond.slice_mut(region)?.fill(0);
        Ok(IdentityDims { n, orig, cond })
    }

    fn dims_set(
        &self,
        dims: &IdentityDims,
        region: &mut [u64],
        stage: usize,
        field: DimField,
        value: usize,
    ) -> XcondResult<()> {
        set_stage_field(dims.n, dims.orig.slice_mut(region)?, stage, field, value)?;
        set_stage_field(dims.n, dims.cond.slice_mut(region)?, stage, field, value)
    }

    fn dims_get<'a>(
        &self,
        dims: &IdentityDims,
        region: &'a [u64],
        key: &str,
    ) -> XcondResult<QpDims<'a>> {
        let block = match key {
            CONDENSED_DIMS => dims.cond,
            ORIGINAL_DIMS => dims.orig,
            _ => return Err(XcondError::UnknownKey(key.to_string())),
        };
        QpDims::from_words(dims.n, block.slice(region)?)
    }

    fn opts_initialize_default(&self, shapes: ShapePair<'_>, opts: &mut IdentityOpts) {
        opts.n2 = shapes.original.n() as u64;
        opts.expand_dual_sol = 1;
    }

    fn opts_update(&self, shapes: ShapePair<'_>, opts: &mut IdentityOpts) -> XcondResult<()> {
        same_shape(shapes.original, shapes.condensed, "update")?;
        if opts.n2 != shapes.original.n() as u64 {
            return Err(XcondError::InvalidOption {
                key: "n2".to_string(),
                reason: "identity condensing keeps every stage",
            });
        }
        Ok(())
    }

    fn opts_set(&self, opts: &mut IdentityOpts, key: &str, value: OptValue) -> XcondResult<()> {
        match key {
            "n2" => opts.n2 = value.as_usize(key)? as u64,
            "expand_dual_sol" => opts.expand_dual_sol = value.as_bool(key)? as u64,
            _ => return Err(XcondError::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    fn memory_size(&self, shapes: ShapePair<'_>, _opts: &IdentityOpts) -> usize {
        u32_bytes(shapes.condensed.n() + 1)
    }

    fn memory_assign(
        &self,
        shapes: ShapePair<'_>,
        opts: &IdentityOpts,
        region: &mut [u64],
    ) -> XcondResult<IdentityMemory> {
        let stages = shapes.condensed.n() + 1;
        let mut c = Carver::new();
        let stage_map = c.take_u32(stages);
        c.finish(self.memory_size(shapes, opts), "identity memory")?;

        let words = stage_map.slice_mut(region)?;
        words.fill(0);
        for (k, slot) in u32s_mut(words).iter_mut().take(stages).enumerate() {
            *slot = k as u32;
        }
        Ok(IdentityMemory { stage_map })
    }

    fn workspace_size(&self, _shapes: ShapePair<'_>, _opts: &IdentityOpts) -> usize {
        0
    }

    fn condense(
        &self,
        qp_in: QpIn<'_>,
        cond_in: &mut QpInMut<'_>,
        _opts: &IdentityOpts,
        mem: &IdentityMemory,
        mem_region: &mut [u64],
        _work: &mut [u64],
    ) -> XcondResult<()> {
        same_shape(qp_in.dims(), cond_in.dims(), "condense")?;
        let map = mem.stage_map(mem_region)?;
        for (k, &src) in map.iter().enumerate() {
            let src = src as usize;
            cond_in.rsq_mut(k).copy_from_slice(qp_in.rsq(src));
            cond_in.rq_mut(k).copy_from_slice(qp_in.rq(src));
            cond_in.ba_mut(k).copy_from_slice(qp_in.ba(src));
            cond_in.b_mut(k).copy_from_slice(qp_in.b(src));
            cond_in.idxb_mut(k).copy_from_slice(qp_in.idxb(src));
            cond_in.lb_mut(k).copy_from_slice(qp_in.lb(src));
            cond_in.ub_mut(k).copy_from_slice(qp_in.ub(src));
            cond_in.dc_mut(k).copy_from_slice(qp_in.dc(src));
            cond_in.lg_mut(k).copy_from_slice(qp_in.lg(src));
            cond_in.ug_mut(k).copy_from_slice(qp_in.ug(src));
        }
        Ok(())
    }

    fn expand(
        &self,
        cond_out: QpOut<'_>,
        qp_out: &mut QpOutMut<'_>,
        opts: &IdentityOpts,
        mem: &IdentityMemory,
        mem_region: &mut [u64],
        _work: &mut [u64],
    ) -> XcondResult<()> {
        same_shape(cond_out.dims(), qp_out.dims(), "expand")?;
        let map = mem.stage_map(mem_region)?;
        let duals = opts.expand_dual_sol();
        for (k, &dst) in map.iter().enumerate() {
            let dst = dst as usize;
            qp_out.ux_mut(dst).copy_from_slice(cond_out.ux(k));
            qp_out.t_mut(dst).copy_from_slice(cond_out.t(k));
            if duals {
                qp_out.pi_mut(dst).copy_from_slice(cond_out.pi(k));
                qp_out.lam_mut(dst).copy_from_slice(cond_out.lam(k));
            } else {
                qp_out.pi_mut(dst).fill(0.0);
                qp_out.lam_mut(dst).fill(0.0);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::StageDims;
    use crate::mem::Arena;
    use crate::qp::{OcpQpIn, OcpQpOut};

    fn pair(dims: QpDims<'_>) -> ShapePair<'_> {
        ShapePair {
            original: dims,
            condensed: dims,
        }
    }

    #[test]
    fn test_dims_set_keeps_both_views() {
        let s = IdentityCondensing;
        let mut arena = Arena::new(s.dims_size(1));
        let dims = s.dims_assign(1, arena.words_mut()).unwrap();
        s.dims_set(&dims, arena.words_mut(), 0, DimField::Nx, 2).unwrap();
        s.dims_set(&dims, arena.words_mut(), 0, DimField::Nu, 1).unwrap();
        s.dims_set(&dims, arena.words_mut(), 1, DimField::Nx, 2).unwrap();

        let cond = s.dims_get(&dims, arena.words(), CONDENSED_DIMS).unwrap();
        let orig = s.dims_get(&dims, arena.words(), ORIGINAL_DIMS).unwrap();
        assert_eq!(cond, orig);
        assert_eq!(cond.stage(0).nv(), 3);
        assert!(matches!(
            s.dims_get(&dims, arena.words(), "condensed-dims"),
            Err(XcondError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_opts_reject_merging() {
        let s = IdentityCondensing;
        let stages = [StageDims::new(1, 1), StageDims::new(1, 1), StageDims::new(1, 0)];
        let shapes = pair(QpDims::new(&stages));
        let mut opts = IdentityOpts::zeroed();
        s.opts_initialize_default(shapes, &mut opts);
        assert_eq!(opts.n2, 2);
        assert!(opts.expand_dual_sol());
        s.opts_update(shapes, &mut opts).unwrap();

        s.opts_set(&mut opts, "n2", OptValue::from(1)).unwrap();
        assert!(matches!(
            s.opts_update(shapes, &mut opts),
            Err(XcondError::InvalidOption { .. })
        ));
        assert!(matches!(
            s.opts_set(&mut opts, "tol", OptValue::from(1e-6)),
            Err(XcondError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_condense_then_expand_moves_every_stage() {
        let s = IdentityCondensing;
        let stages = [StageDims::new(2, 1), StageDims::new(2, 0)];
        let dims = QpDims::new(&stages);
        let mut opts = IdentityOpts::zeroed();
        s.opts_initialize_default(pair(dims), &mut opts);
        s.opts_set(&mut opts, "expand_dual_sol", OptValue::from(false))
            .unwrap();

        let mut mem_arena = Arena::new(s.memory_size(pair(dims), &opts));
        let mem = s
            .memory_assign(pair(dims), &opts, mem_arena.words_mut())
            .unwrap();
        assert_eq!(mem.stage_map(mem_arena.words()).unwrap(), &[0, 1]);

        let mut qp = OcpQpIn::new(dims).unwrap();
        qp.view_mut().rq_mut(0).copy_from_slice(&[1.0, 2.0, 3.0]);
        qp.view_mut().b_mut(0).copy_from_slice(&[-1.0, 0.5]);
        let mut cond = OcpQpIn::new(dims).unwrap();
        s.condense(
            qp.view(),
            &mut cond.view_mut(),
            &opts,
            &mem,
            mem_arena.words_mut(),
            &mut [],
        )
        .unwrap();
        assert_eq!(cond.view().rq(0), &[1.0, 2.0, 3.0]);
        assert_eq!(cond.view().b(0), &[-1.0, 0.5]);

        let mut cond_out = OcpQpOut::new(dims).unwrap();
        cond_out.view_mut().ux_mut(1).copy_from_slice(&[4.0, 5.0]);
        cond_out.view_mut().pi_mut(0).copy_from_slice(&[6.0, 7.0]);
        let mut out = OcpQpOut::new(dims).unwrap();
        out.view_mut().pi_mut(0).fill(9.0);
        s.expand(
            cond_out.view(),
            &mut out.view_mut(),
            &opts,
            &mem,
            mem_arena.words_mut(),
            &mut [],
        )
        .unwrap();
        assert_eq!(out.view().ux(1), &[4.0, 5.0]);
        assert_eq!(out.view().pi(0), &[0.0, 0.0]);
    }
}
