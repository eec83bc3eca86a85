//! QP backends.

pub mod dense_kkt;

pub use dense_kkt::{DenseKktBackend, DenseKktMemory, DenseKktOpts, DenseKktState};
