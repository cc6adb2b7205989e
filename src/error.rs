//! Error types shared across the samplers.
//!
//! Two failure classes exist. Fatal errors ([`McmcError`]) abort the run:
//! mismatched step-size vectors at setup time, a Fisher matrix that fails its
//! Cholesky factorisation, or a sink that can no longer be written to.
//! Numerical divergence ([`NanInfError`]) is recoverable at sample
//! granularity: the Riemannian sampler catches it, discards the current
//! leapfrog chain, keeps the last accepted state and moves on to the next
//! sample.

use thiserror::Error;

/// A fatal sampler error. No retry policy is defined for any variant.
#[derive(Debug, Error)]
pub enum McmcError {
    /// A step-size vector loaded at setup does not match the state dimension.
    #[error("step size vector length {found} does not match state dimension {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The Fisher information (or other curvature) matrix is not positive
    /// definite, so its Cholesky factorisation failed.
    #[error("curvature matrix is not positive definite")]
    NotPositiveDefinite,

    /// Writing a sample record to a sink failed.
    #[error("failed to write sample record: {0}")]
    Sink(#[from] std::io::Error),

    /// Writing a CSV sample record failed.
    #[cfg(feature = "csv")]
    #[error("failed to write CSV sample record: {0}")]
    Csv(#[from] csv::Error),
}

/// NaN or Inf values appeared during an implicit momentum or position solve.
///
/// Raised by the Newton iterations of the non-separable leapfrog; the sampler
/// treats it as "reject this sample attempt", not as a run failure.
#[derive(Debug, Clone, Copy, Error)]
#[error("NaN or Inf values found")]
pub struct NanInfError;
