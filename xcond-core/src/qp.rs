//! OCP-QP input and output records.
//!
//! The QP over stages `k = 0..=N` is
//!
//! ```text
//! minimize    sum_k  0.5 [u;x]_k^T RSQ_k [u;x]_k + rq_k^T [u;x]_k
//! subject to  x_{k+1} = B_k u_k + A_k x_k + b_k          k < N
//!             lb_k <= [u;x]_k[idxb_k] <= ub_k
//!             lg_k <= [D_k C_k] [u;x]_k <= ug_k
//! ```
//!
//! Records are flat regions of `u64` words whose layout is a pure function
//! of the shape. [`QpInLayout`] / [`QpOutLayout`] hold the block table, the
//! views ([`QpIn`], [`QpInMut`], [`QpOut`], [`QpOutMut`]) pair a layout with
//! the words it describes. All matrices are dense column-major.

use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::dims::{QpDims, StageDims};
use crate::error::{LayoutError, XcondError, XcondResult};
use crate::mem::{
    f64_bytes, f64s, f64s_mut, record, record_bytes, record_mut, u32_bytes, u32s, u32s_mut, Arena,
    Block, Carver, ALIGN,
};

/// Status returned by a QP solve.
///
/// Non-success codes are reported, not raised: the pipeline hands them back
/// verbatim and the caller decides whether to trust the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QpStatus {
    Success,
    NanDetected,
    MaxIter,
    MinStep,
    QpFailure,
    Ready,
    Unbounded,
}

impl QpStatus {
    pub fn code(self) -> i32 {
        match self {
            QpStatus::Success => 0,
            QpStatus::NanDetected => 1,
            QpStatus::MaxIter => 2,
            QpStatus::MinStep => 3,
            QpStatus::QpFailure => 4,
            QpStatus::Ready => 5,
            QpStatus::Unbounded => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => QpStatus::Success,
            1 => QpStatus::NanDetected,
            2 => QpStatus::MaxIter,
            3 => QpStatus::MinStep,
            4 => QpStatus::QpFailure,
            5 => QpStatus::Ready,
            6 => QpStatus::Unbounded,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == QpStatus::Success
    }
}

impl fmt::Display for QpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QpStatus::Success => write!(f, "Success"),
            QpStatus::NanDetected => write!(f, "NaN detected"),
            QpStatus::MaxIter => write!(f, "MaxIter"),
            QpStatus::MinStep => write!(f, "MinStep"),
            QpStatus::QpFailure => write!(f, "QP failure"),
            QpStatus::Ready => write!(f, "Ready"),
            QpStatus::Unbounded => write!(f, "Unbounded"),
        }
    }
}

/// Diagnostics side-channel stored at the front of every output record.
///
/// Times are in seconds.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct QpInfo {
    /// Condense plus expand time.
    pub condensing_time: f64,
    /// Time inside the backend's numerical solve.
    pub solve_qp_time: f64,
    /// Time the backend spent moving data in and out of its own format.
    pub interface_time: f64,
    /// Wall time of the whole call.
    pub total_time: f64,
    pub num_iter: u64,
    /// Nonzero when the backend filled the slack vectors `t`.
    pub t_computed: u64,
}

impl QpInfo {
    pub fn num_iter(&self) -> usize {
        self.num_iter as usize
    }

    pub fn t_computed(&self) -> bool {
        self.t_computed != 0
    }
}

/// Blocks of one input stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageInBlocks {
    pub rsq: Block,
    pub rq: Block,
    pub ba: Block,
    pub b: Block,
    pub idxb: Block,
    pub lb: Block,
    pub ub: Block,
    pub dc: Block,
    pub lg: Block,
    pub ug: Block,
}

/// Block table of an input record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QpInLayout {
    dims: Vec<StageDims>,
    stages: Vec<StageInBlocks>,
    total: usize,
}

impl QpInLayout {
    /// Bytes of an input record over `dims`.
    pub fn size(dims: QpDims<'_>) -> usize {
        (0..=dims.n())
            .map(|k| {
                let s = dims.stage(k);
                let (nv, nx1, nb, ng) = (s.nv(), dims.nx_next(k), s.nb(), s.ng());
                f64_bytes(nv * nv)
                    + f64_bytes(nv)
                    + f64_bytes(nx1 * nv)
                    + f64_bytes(nx1)
                    + u32_bytes(nb)
                    + 2 * f64_bytes(nb)
                    + f64_bytes(ng * nv)
                    + 2 * f64_bytes(ng)
            })
            .sum()
    }

    /// Carve the block table for `dims`.
    pub fn assign(dims: QpDims<'_>) -> XcondResult<Self> {
        let total = Self::size(dims);
        let mut c = Carver::new();
        let stages = (0..=dims.n())
            .map(|k| {
                let s = dims.stage(k);
                let (nv, nx1, nb, ng) = (s.nv(), dims.nx_next(k), s.nb(), s.ng());
                StageInBlocks {
                    rsq: c.take_f64(nv * nv),
                    rq: c.take_f64(nv),
                    ba: c.take_f64(nx1 * nv),
                    b: c.take_f64(nx1),
                    idxb: c.take_u32(nb),
                    lb: c.take_f64(nb),
                    ub: c.take_f64(nb),
                    dc: c.take_f64(ng * nv),
                    lg: c.take_f64(ng),
                    ug: c.take_f64(ng),
                }
            })
            .collect();
        c.finish(total, "qp_in")?;
        Ok(Self {
            dims: dims.stages().to_vec(),
            stages,
            total,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn dims(&self) -> QpDims<'_> {
        QpDims::new(&self.dims)
    }

    pub fn stage(&self, k: usize) -> &StageInBlocks {
        &self.stages[k]
    }

    fn check(&self, words: &[u64]) -> Result<(), LayoutError> {
        if words.len() * ALIGN < self.total {
            return Err(LayoutError::BufferSize {
                required: self.total,
                actual: words.len() * ALIGN,
            });
        }
        Ok(())
    }
}

/// Blocks of one output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageOutBlocks {
    pub ux: Block,
    pub pi: Block,
    pub lam: Block,
    pub t: Block,
}

/// Block table of an output record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QpOutLayout {
    dims: Vec<StageDims>,
    info: Block,
    stages: Vec<StageOutBlocks>,
    total: usize,
}

impl QpOutLayout {
    /// Bytes of an output record over `dims`.
    pub fn size(dims: QpDims<'_>) -> usize {
        record_bytes::<QpInfo>(1)
            + (0..=dims.n())
                .map(|k| {
                    let s = dims.stage(k);
                    let ni = s.nb() + s.ng();
                    f64_bytes(s.nv()) + f64_bytes(dims.nx_next(k)) + 2 * f64_bytes(2 * ni)
                })
                .sum::<usize>()
    }

    pub fn assign(dims: QpDims<'_>) -> XcondResult<Self> {
        let total = Self::size(dims);
        let mut c = Carver::new();
        let info = c.take_record::<QpInfo>(1);
        let stages = (0..=dims.n())
            .map(|k| {
                let s = dims.stage(k);
                let ni = s.nb() + s.ng();
                StageOutBlocks {
                    ux: c.take_f64(s.nv()),
                    pi: c.take_f64(dims.nx_next(k)),
                    lam: c.take_f64(2 * ni),
                    t: c.take_f64(2 * ni),
                }
            })
            .collect();
        c.finish(total, "qp_out")?;
        Ok(Self {
            dims: dims.stages().to_vec(),
            info,
            stages,
            total,
        })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn dims(&self) -> QpDims<'_> {
        QpDims::new(&self.dims)
    }

    pub fn info_block(&self) -> Block {
        self.info
    }

    pub fn stage(&self, k: usize) -> &StageOutBlocks {
        &self.stages[k]
    }

    fn check(&self, words: &[u64]) -> Result<(), LayoutError> {
        if words.len() * ALIGN < self.total {
            return Err(LayoutError::BufferSize {
                required: self.total,
                actual: words.len() * ALIGN,
            });
        }
        Ok(())
    }
}

#[inline]
fn f64_block(words: &[u64], b: Block) -> &[f64] {
    &f64s(&words[b.word_range()])[..b.len / size_of::<f64>()]
}

#[inline]
fn f64_block_mut(words: &mut [u64], b: Block) -> &mut [f64] {
    &mut f64s_mut(&mut words[b.word_range()])[..b.len / size_of::<f64>()]
}

#[inline]
fn u32_block(words: &[u64], b: Block) -> &[u32] {
    &u32s(&words[b.word_range()])[..b.len / size_of::<u32>()]
}

#[inline]
fn u32_block_mut(words: &mut [u64], b: Block) -> &mut [u32] {
    &mut u32s_mut(&mut words[b.word_range()])[..b.len / size_of::<u32>()]
}

/// Read-only view of an input record.
#[derive(Clone, Copy)]
pub struct QpIn<'a> {
    layout: &'a QpInLayout,
    words: &'a [u64],
}

impl<'a> QpIn<'a> {
    pub fn new(layout: &'a QpInLayout, words: &'a [u64]) -> Result<Self, LayoutError> {
        layout.check(words)?;
        Ok(Self { layout, words })
    }

    pub fn dims(&self) -> QpDims<'a> {
        self.layout.dims()
    }

    pub fn layout(&self) -> &'a QpInLayout {
        self.layout
    }

    fn f(&self, b: Block) -> &'a [f64] {
        let words: &'a [u64] = self.words;
        f64_block(words, b)
    }

    pub fn rsq(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].rsq)
    }

    pub fn rq(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].rq)
    }

    pub fn ba(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].ba)
    }

    pub fn b(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].b)
    }

    pub fn idxb(&self, k: usize) -> &'a [u32] {
        let words: &'a [u64] = self.words;
        u32_block(words, self.layout.stages[k].idxb)
    }

    pub fn lb(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].lb)
    }

    pub fn ub(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].ub)
    }

    pub fn dc(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].dc)
    }

    pub fn lg(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].lg)
    }

    pub fn ug(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].ug)
    }

    /// Raw words of the record.
    pub fn words(&self) -> &'a [u64] {
        &self.words[..self.layout.total / ALIGN]
    }
}

/// Mutable view of an input record.
pub struct QpInMut<'a> {
    layout: &'a QpInLayout,
    words: &'a mut [u64],
}

impl<'a> QpInMut<'a> {
    pub fn new(layout: &'a QpInLayout, words: &'a mut [u64]) -> Result<Self, LayoutError> {
        layout.check(words)?;
        Ok(Self { layout, words })
    }

    pub fn as_ref(&self) -> QpIn<'_> {
        QpIn {
            layout: self.layout,
            words: &*self.words,
        }
    }

    pub fn dims(&self) -> QpDims<'a> {
        self.layout.dims()
    }

    pub fn rsq_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].rsq)
    }

    pub fn rq_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].rq)
    }

    pub fn ba_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].ba)
    }

    pub fn b_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].b)
    }

    pub fn idxb_mut(&mut self, k: usize) -> &mut [u32] {
        u32_block_mut(&mut *self.words, self.layout.stages[k].idxb)
    }

    pub fn lb_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].lb)
    }

    pub fn ub_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].ub)
    }

    pub fn dc_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].dc)
    }

    pub fn lg_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].lg)
    }

    pub fn ug_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].ug)
    }

    /// Copy a record of identical shape.
    pub fn copy_from(&mut self, src: &QpIn<'_>) -> XcondResult<()> {
        if src.dims() != self.dims() {
            return Err(XcondError::InvalidDimension(
                "input records differ in shape".to_string(),
            ));
        }
        let n = self.layout.total / ALIGN;
        self.words[..n].copy_from_slice(src.words());
        Ok(())
    }
}

/// Read-only view of an output record.
#[derive(Clone, Copy)]
pub struct QpOut<'a> {
    layout: &'a QpOutLayout,
    words: &'a [u64],
}

impl<'a> QpOut<'a> {
    pub fn new(layout: &'a QpOutLayout, words: &'a [u64]) -> Result<Self, LayoutError> {
        layout.check(words)?;
        Ok(Self { layout, words })
    }

    pub fn dims(&self) -> QpDims<'a> {
        self.layout.dims()
    }

    pub fn info(&self) -> QpInfo {
        // The info block is carved first and sized for one record.
        record::<QpInfo>(&self.words[self.layout.info.word_range()])
            .copied()
            .unwrap_or_default()
    }

    fn f(&self, b: Block) -> &'a [f64] {
        let words: &'a [u64] = self.words;
        f64_block(words, b)
    }

    pub fn ux(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].ux)
    }

    pub fn pi(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].pi)
    }

    pub fn lam(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].lam)
    }

    pub fn t(&self, k: usize) -> &'a [f64] {
        self.f(self.layout.stages[k].t)
    }
}

/// Mutable view of an output record.
pub struct QpOutMut<'a> {
    layout: &'a QpOutLayout,
    words: &'a mut [u64],
}

impl<'a> QpOutMut<'a> {
    pub fn new(layout: &'a QpOutLayout, words: &'a mut [u64]) -> Result<Self, LayoutError> {
        layout.check(words)?;
        Ok(Self { layout, words })
    }

    pub fn as_ref(&self) -> QpOut<'_> {
        QpOut {
            layout: self.layout,
            words: &*self.words,
        }
    }

    pub fn dims(&self) -> QpDims<'a> {
        self.layout.dims()
    }

    pub fn info_mut(&mut self) -> Result<&mut QpInfo, LayoutError> {
        record_mut::<QpInfo>(&mut self.words[self.layout.info.word_range()])
    }

    pub fn ux_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].ux)
    }

    pub fn pi_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].pi)
    }

    pub fn lam_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].lam)
    }

    pub fn t_mut(&mut self, k: usize) -> &mut [f64] {
        f64_block_mut(&mut *self.words, self.layout.stages[k].t)
    }

    /// Zero the stage vectors, leaving the info record alone.
    pub fn clear_solution(&mut self) {
        let start = self.layout.info.end() / ALIGN;
        let end = self.layout.total / ALIGN;
        self.words[start..end].fill(0);
    }
}

/// Caller-owned input record.
#[derive(Debug, Clone)]
pub struct OcpQpIn {
    layout: QpInLayout,
    arena: Arena,
}

impl OcpQpIn {
    /// Allocate and carve an input record for `dims`.
    pub fn new(dims: QpDims<'_>) -> XcondResult<Self> {
        Self::assign(dims, Arena::new(QpInLayout::size(dims)))
    }

    /// Carve an input record into a buffer of exactly [`QpInLayout::size`] bytes.
    pub fn assign(dims: QpDims<'_>, arena: Arena) -> XcondResult<Self> {
        let layout = QpInLayout::assign(dims)?;
        arena.expect_len(layout.total())?;
        Ok(Self { layout, arena })
    }

    pub fn dims(&self) -> QpDims<'_> {
        self.layout.dims()
    }

    pub fn view(&self) -> QpIn<'_> {
        QpIn {
            layout: &self.layout,
            words: self.arena.words(),
        }
    }

    pub fn view_mut(&mut self) -> QpInMut<'_> {
        QpInMut {
            layout: &self.layout,
            words: self.arena.words_mut(),
        }
    }
}

/// Caller-owned output record.
#[derive(Debug, Clone)]
pub struct OcpQpOut {
    layout: QpOutLayout,
    arena: Arena,
}

impl OcpQpOut {
    pub fn new(dims: QpDims<'_>) -> XcondResult<Self> {
        Self::assign(dims, Arena::new(QpOutLayout::size(dims)))
    }

    pub fn assign(dims: QpDims<'_>, arena: Arena) -> XcondResult<Self> {
        let layout = QpOutLayout::assign(dims)?;
        arena.expect_len(layout.total())?;
        Ok(Self { layout, arena })
    }

    pub fn dims(&self) -> QpDims<'_> {
        self.layout.dims()
    }

    pub fn info(&self) -> QpInfo {
        self.view().info()
    }

    pub fn view(&self) -> QpOut<'_> {
        QpOut {
            layout: &self.layout,
            words: self.arena.words(),
        }
    }

    pub fn view_mut(&mut self) -> QpOutMut<'_> {
        QpOutMut {
            layout: &self.layout,
            words: self.arena.words_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dims::DimField;

    fn shape() -> Vec<StageDims> {
        let mut s0 = StageDims::new(2, 1);
        s0.set(DimField::Nbu, 1);
        let mut s1 = StageDims::new(2, 1);
        s1.set(DimField::Ng, 1);
        let s2 = StageDims::new(2, 0);
        vec![s0, s1, s2]
    }

    #[test]
    fn test_status_codes() {
        for code in 0..7 {
            assert_eq!(QpStatus::from_code(code).unwrap().code(), code);
        }
        assert!(QpStatus::from_code(7).is_none());
        assert!(QpStatus::Success.is_success());
        assert!(!QpStatus::MaxIter.is_success());
    }

    #[test]
    fn test_qp_in_layout_is_exact_and_aligned() {
        let stages = shape();
        let dims = QpDims::new(&stages);
        let layout = QpInLayout::assign(dims).unwrap();
        assert_eq!(layout.total(), QpInLayout::size(dims));
        for k in 0..=dims.n() {
            let b = layout.stage(k);
            for block in [b.rsq, b.rq, b.ba, b.b, b.idxb, b.lb, b.ub, b.dc, b.lg, b.ug] {
                assert_eq!(block.offset % ALIGN, 0);
            }
        }
        // stage 0: rsq 9, rq 3, ba 2*3, b 2, idxb 1 (padded), lb/ub 1, no dc
        assert_eq!(layout.stage(0).ba.len, 6 * 8);
        assert_eq!(layout.stage(0).idxb.len, 4);
        assert_eq!(layout.stage(1).dc.len, 3 * 8);
        assert!(layout.stage(2).ba.is_empty());
    }

    #[test]
    fn test_qp_in_views() {
        let stages = shape();
        let mut qp = OcpQpIn::new(QpDims::new(&stages)).unwrap();
        {
            let mut v = qp.view_mut();
            v.rq_mut(1).copy_from_slice(&[1.0, 2.0, 3.0]);
            v.idxb_mut(0)[0] = 0;
            v.ug_mut(1)[0] = 4.5;
            v.b_mut(0).copy_from_slice(&[0.5, -0.5]);
        }
        let v = qp.view();
        assert_eq!(v.rq(1), &[1.0, 2.0, 3.0]);
        assert_eq!(v.ug(1), &[4.5]);
        assert_eq!(v.b(0), &[0.5, -0.5]);
        assert_eq!(v.idxb(0).len(), 1);
        assert!(v.b(2).is_empty());

        let mut copy = OcpQpIn::new(qp.dims()).unwrap();
        copy.view_mut().copy_from(&qp.view()).unwrap();
        assert_eq!(copy.view().rq(1), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_copy_from_rejects_other_shape() {
        let stages = shape();
        let qp = OcpQpIn::new(QpDims::new(&stages)).unwrap();
        let other = [StageDims::new(1, 1)];
        let mut dst = OcpQpIn::new(QpDims::new(&other)).unwrap();
        assert!(dst.view_mut().copy_from(&qp.view()).is_err());
    }

    #[test]
    fn test_qp_out_info_and_clear() {
        let stages = shape();
        let mut out = OcpQpOut::new(QpDims::new(&stages)).unwrap();
        assert_eq!(out.view().lam(0).len(), 2);
        assert_eq!(out.view().pi(2).len(), 0);
        {
            let mut v = out.view_mut();
            v.info_mut().unwrap().num_iter = 7;
            v.ux_mut(0).fill(1.0);
            v.clear_solution();
        }
        assert_eq!(out.info().num_iter(), 7);
        assert!(out.view().ux(0).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_assign_rejects_wrong_buffer() {
        let stages = shape();
        let dims = QpDims::new(&stages);
        let err = OcpQpOut::assign(dims, Arena::new(8)).unwrap_err();
        assert!(matches!(
            err,
            XcondError::Layout(LayoutError::BufferSize { actual: 8, .. })
        ));
    }
}
