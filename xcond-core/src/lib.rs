//! xcond: a condensing OCP-QP solver pipeline.
//!
//! This library composes two interchangeable modules into one optimal-control
//! QP solver:
//!
//! - a **condensing strategy** ([`CondensingStrategy`]) that rewrites the
//!   stage-wise problem into a smaller equivalent one and maps its solution
//!   back, and
//! - a **QP backend** ([`QpBackend`]) that solves the condensed problem.
//!
//! [`XcondSolver`] drives a solve as condense, solve, expand, timing every
//! phase into the [`QpInfo`] record of the caller's output.
//!
//! # Memory
//!
//! Every structure is sized in closed form before any memory exists, then
//! carved out of one caller-allocated [`Arena`] per structure class
//! (dimensions, options, memory) plus a scratch workspace. Carving is checked
//! against the precomputed size; nothing on the solve path allocates.
//!
//! # Example
//!
//! ```ignore
//! use xcond_core::{
//!     Arena, DenseKktBackend, DimField, IdentityCondensing, OcpQpIn, OcpQpOut,
//!     OcpQpSolver, XcondSolver,
//! };
//!
//! let solver = XcondSolver::new(IdentityCondensing::new(), DenseKktBackend::new());
//!
//! let mut dims = solver.dims_assign(1, Arena::new(solver.dims_size(1)))?;
//! solver.dims_set(&mut dims, 0, DimField::Nx, 2)?;
//! solver.dims_set(&mut dims, 0, DimField::Nu, 1)?;
//! solver.dims_set(&mut dims, 1, DimField::Nx, 2)?;
//!
//! let mut opts = solver.opts_assign(&dims, Arena::new(solver.opts_size(&dims)?))?;
//! solver.opts_initialize_default(&dims, &mut opts)?;
//! solver.opts_set(&mut opts, "maxiter", 10.into())?;
//! solver.opts_update(&dims, &mut opts)?;
//!
//! let mut mem = solver.memory_assign(&dims, &opts, Arena::new(solver.memory_size(&dims, &opts)?))?;
//! let mut work = Arena::new(solver.workspace_size(&dims, &opts)?);
//!
//! let qp_in = OcpQpIn::new(dims.original()?)?;
//! let mut qp_out = OcpQpOut::new(dims.original()?)?;
//! let status = solver.evaluate(qp_in.view(), &mut qp_out.view_mut(), &opts, &mut mem, work.words_mut())?;
//! println!("status {status}, {} iterations", qp_out.info().num_iter());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // module capabilities pass opts, memory and workspace separately

pub mod backend;
pub mod backends;
pub mod condensing;
pub mod diagnostics;
pub mod dims;
pub mod error;
pub mod mem;
pub mod options;
pub mod qp;
pub mod solver;
pub mod strategy;
pub mod timing;

pub use backend::QpBackend;
pub use backends::DenseKktBackend;
pub use condensing::IdentityCondensing;
pub use diagnostics::DiagnosticsConfig;
pub use dims::{DimField, QpDims, StageDims};
pub use error::{LayoutError, XcondError, XcondResult};
pub use mem::{Arena, Block};
pub use options::{OptValue, OptionRoute, OptionRouter};
pub use qp::{OcpQpIn, OcpQpOut, QpIn, QpInMut, QpInfo, QpOut, QpOutMut, QpStatus};
pub use solver::{OcpQpSolver, WorkspaceOverlay, XcondDims, XcondMemory, XcondOpts, XcondSolver};
pub use strategy::{CondensingStrategy, ShapePair, CONDENSED_DIMS, ORIGINAL_DIMS};
