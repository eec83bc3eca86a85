//! Error types for the condensing solver pipeline.

use thiserror::Error;

/// Faults in sizing or carving a buffer.
///
/// These never occur when every `*_size` / `*_assign` pair agrees; seeing one
/// means a sub-module reported a size its carving did not honor, or a caller
/// handed in the wrong buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    /// Cumulative carved bytes disagree with the precomputed size.
    #[error("layout mismatch: carved {carved} bytes, expected {expected}")]
    SizeMismatch { expected: usize, carved: usize },

    /// Buffer handed to an assign call has the wrong size.
    #[error("buffer holds {actual} bytes, layout requires {required}")]
    BufferSize { required: usize, actual: usize },

    /// Block does not start on an 8-byte boundary.
    #[error("block at offset {offset} is not {align}-byte aligned")]
    Misaligned { offset: usize, align: usize },

    /// Block extends past the end of its region.
    #[error("block [{offset}, {offset}+{len}) exceeds region of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// Two blocks requested together share bytes.
    #[error("blocks overlap at offset {offset}")]
    Overlap { offset: usize },

    /// Record header does not describe this layout.
    #[error("record header mismatch: {0}")]
    Header(&'static str),

    /// Region cannot be viewed as the requested record type.
    #[error("cannot view {len} bytes as {ty}")]
    Cast { ty: &'static str, len: usize },
}

/// Errors surfaced by the solver pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum XcondError {
    /// Memory layout fault.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Option key could not be routed to a module.
    #[error("invalid option key {key:?}: {reason}")]
    InvalidOption { key: String, reason: &'static str },

    /// A module does not know the option it was handed.
    #[error("unknown option {0:?}")]
    UnknownOption(String),

    /// Option value has the wrong kind.
    #[error("option {key:?} expects {expected}")]
    OptionType { key: String, expected: &'static str },

    /// Dimension field, stage, or value is not valid.
    #[error("invalid dimension: {0}")]
    InvalidDimension(String),

    /// Keyed shape accessor does not know the key.
    #[error("unknown shape key {0:?}")]
    UnknownKey(String),

    /// Operation exists in the interface but is not implemented.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Result type for pipeline operations.
pub type XcondResult<T> = Result<T, XcondError>;
