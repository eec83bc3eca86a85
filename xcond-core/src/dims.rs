//! Problem shape records.
//!
//! An OCP-QP over `N` stages is described by `N + 1` [`StageDims`]. The
//! record is stored in an arena like everything else, so a shape can be
//! handed between modules as a borrowed [`QpDims`] view without the receiver
//! knowing who owns or carved it.

use std::fmt;
use std::str::FromStr;

use bytemuck::{Pod, Zeroable};

use crate::error::{XcondError, XcondResult};
use crate::mem::{record_bytes, records, records_mut};

/// Shape of one stage.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct StageDims {
    /// States.
    pub nx: u64,
    /// Controls.
    pub nu: u64,
    /// State bounds.
    pub nbx: u64,
    /// Control bounds.
    pub nbu: u64,
    /// General (polytopic) constraints.
    pub ng: u64,
}

impl StageDims {
    pub fn new(nx: usize, nu: usize) -> Self {
        Self {
            nx: nx as u64,
            nu: nu as u64,
            ..Self::default()
        }
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx as usize
    }

    #[inline]
    pub fn nu(&self) -> usize {
        self.nu as usize
    }

    /// Stage variables `[u; x]`.
    #[inline]
    pub fn nv(&self) -> usize {
        self.nu() + self.nx()
    }

    /// All bounds.
    #[inline]
    pub fn nb(&self) -> usize {
        (self.nbx + self.nbu) as usize
    }

    #[inline]
    pub fn ng(&self) -> usize {
        self.ng as usize
    }

    /// Whether the stage carries any inequality.
    pub fn has_inequalities(&self) -> bool {
        self.nb() + self.ng() > 0
    }

    pub fn get(&self, field: DimField) -> usize {
        (match field {
            DimField::Nx => self.nx,
            DimField::Nu => self.nu,
            DimField::Nbx => self.nbx,
            DimField::Nbu => self.nbu,
            DimField::Ng => self.ng,
        }) as usize
    }

    pub fn set(&mut self, field: DimField, value: usize) {
        let slot = match field {
            DimField::Nx => &mut self.nx,
            DimField::Nu => &mut self.nu,
            DimField::Nbx => &mut self.nbx,
            DimField::Nbu => &mut self.nbu,
            DimField::Ng => &mut self.ng,
        };
        *slot = value as u64;
    }
}

/// Settable per-stage dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimField {
    Nx,
    Nu,
    Nbx,
    Nbu,
    Ng,
}

impl DimField {
    pub const ALL: [DimField; 5] = [
        DimField::Nx,
        DimField::Nu,
        DimField::Nbx,
        DimField::Nbu,
        DimField::Ng,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DimField::Nx => "nx",
            DimField::Nu => "nu",
            DimField::Nbx => "nbx",
            DimField::Nbu => "nbu",
            DimField::Ng => "ng",
        }
    }
}

impl fmt::Display for DimField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DimField {
    type Err = XcondError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DimField::ALL
            .into_iter()
            .find(|f| f.name() == s)
            .ok_or_else(|| XcondError::InvalidDimension(format!("unknown field {s:?}")))
    }
}

/// Borrowed view of a shape record.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct QpDims<'a> {
    stages: &'a [StageDims],
}

impl<'a> QpDims<'a> {
    /// Bytes of a shape record over `n` stages.
    pub const fn size(n: usize) -> usize {
        record_bytes::<StageDims>(n + 1)
    }

    pub fn new(stages: &'a [StageDims]) -> Self {
        debug_assert!(!stages.is_empty(), "a shape has at least one stage");
        Self { stages }
    }

    /// View a region carved with [`QpDims::size`].
    pub fn from_words(n: usize, words: &'a [u64]) -> XcondResult<Self> {
        Ok(Self::new(records::<StageDims>(words, n + 1)?))
    }

    /// Number of stages `N` (the record holds `N + 1`).
    pub fn n(&self) -> usize {
        self.stages.len() - 1
    }

    pub fn stage(&self, k: usize) -> &'a StageDims {
        &self.stages[k]
    }

    pub fn stages(&self) -> &'a [StageDims] {
        self.stages
    }

    /// States of the next stage, zero past the horizon.
    pub fn nx_next(&self, k: usize) -> usize {
        if k < self.n() {
            self.stages[k + 1].nx()
        } else {
            0
        }
    }

    /// Stacked primal variables over the horizon.
    pub fn total_nv(&self) -> usize {
        self.stages.iter().map(StageDims::nv).sum()
    }

    /// Stacked dynamics equations over the horizon.
    pub fn total_eq(&self) -> usize {
        (0..self.n()).map(|k| self.nx_next(k)).sum()
    }

    pub fn has_inequalities(&self) -> bool {
        self.stages.iter().any(StageDims::has_inequalities)
    }
}

impl fmt::Debug for QpDims<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QpDims")
            .field("n", &self.n())
            .field("stages", &self.stages)
            .finish()
    }
}

/// Update one field of one stage in a shape record region.
pub fn set_stage_field(
    n: usize,
    words: &mut [u64],
    stage: usize,
    field: DimField,
    value: usize,
) -> XcondResult<()> {
    if stage > n {
        return Err(XcondError::InvalidDimension(format!(
            "stage {stage} out of range (N={n})"
        )));
    }
    let stages = records_mut::<StageDims>(words, n + 1)?;
    stages[stage].set(field, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::Arena;

    #[test]
    fn test_stage_dims_counts() {
        let mut s = StageDims::new(3, 2);
        s.set(DimField::Nbx, 1);
        s.set(DimField::Nbu, 2);
        assert_eq!(s.nv(), 5);
        assert_eq!(s.nb(), 3);
        assert!(s.has_inequalities());
        assert_eq!(s.get(DimField::Nbu), 2);
    }

    #[test]
    fn test_dim_field_parse() {
        assert_eq!("nbx".parse::<DimField>().unwrap(), DimField::Nbx);
        assert!(matches!(
            "nz".parse::<DimField>(),
            Err(XcondError::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_shape_record_in_arena() {
        let n = 2;
        let mut arena = Arena::new(QpDims::size(n));
        assert_eq!(arena.len(), 3 * std::mem::size_of::<StageDims>());
        set_stage_field(n, arena.words_mut(), 0, DimField::Nx, 2).unwrap();
        set_stage_field(n, arena.words_mut(), 1, DimField::Nx, 2).unwrap();
        set_stage_field(n, arena.words_mut(), 2, DimField::Nx, 1).unwrap();
        set_stage_field(n, arena.words_mut(), 0, DimField::Nu, 1).unwrap();
        assert!(set_stage_field(n, arena.words_mut(), 3, DimField::Nx, 1).is_err());

        let dims = QpDims::from_words(n, arena.words()).unwrap();
        assert_eq!(dims.n(), 2);
        assert_eq!(dims.nx_next(0), 2);
        assert_eq!(dims.nx_next(2), 0);
        assert_eq!(dims.total_nv(), 6);
        assert_eq!(dims.total_eq(), 3);
        assert!(!dims.has_inequalities());
    }
}
