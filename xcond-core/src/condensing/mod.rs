//! Condensing strategies.

pub mod identity;

pub use identity::{IdentityCondensing, IdentityDims, IdentityMemory, IdentityOpts};
