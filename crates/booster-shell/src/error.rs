//! Error types for session lifecycle and scratch allocation.
//!
//! [`BoostError`] is what every shell and registry operation returns. The
//! numeric [`ErrorCode`] is the stable form handed across a marshalling
//! boundary, where a Rust enum cannot travel.

use crate::handle::{BoosterHandle, HandleTag};

// =============================================================================
// BoostError
// =============================================================================

/// Errors raised by booster sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BoostError {
    /// A null, freed or foreign handle was presented.
    #[error("invalid booster handle {handle}: {tag}")]
    InvalidHandle {
        /// The offending token.
        handle: BoosterHandle,
        /// What the registry found for it (never `Live`).
        tag: HandleTag,
    },

    /// An allocation or resize could not be satisfied.
    #[error("out of memory allocating {bytes} bytes for {region}")]
    OutOfMemory {
        /// Region that failed to allocate.
        region: &'static str,
        /// Requested size in bytes (`usize::MAX` when the size overflowed).
        bytes: usize,
    },

    /// The owning code misused the shell (e.g. attached a core twice).
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),

    /// A term index outside the attached core's terms.
    #[error("term index {index} out of range (core has {n_terms} terms)")]
    InvalidTerm {
        /// Requested term.
        index: usize,
        /// Number of terms in the core.
        n_terms: usize,
    },
}

impl BoostError {
    /// Stable numeric code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidHandle { .. } => ErrorCode::InvalidHandle,
            Self::OutOfMemory { .. } => ErrorCode::OutOfMemory,
            Self::ContractViolation(_) => ErrorCode::UnexpectedInternal,
            Self::InvalidTerm { .. } => ErrorCode::IllegalParamVal,
        }
    }

    pub(crate) fn oom(region: &'static str, bytes: usize) -> Self {
        Self::OutOfMemory { region, bytes }
    }
}

// =============================================================================
// ErrorCode
// =============================================================================

/// Numeric status codes for marshalling layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    None = 0,
    OutOfMemory = -1,
    UnexpectedInternal = -2,
    IllegalParamVal = -3,
    InvalidHandle = -4,
}

impl ErrorCode {
    /// Collapse a result into its status code.
    pub fn from_result<T>(result: &Result<T, BoostError>) -> Self {
        match result {
            Ok(_) => Self::None,
            Err(e) => e.code(),
        }
    }

    /// Raw integer value.
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
