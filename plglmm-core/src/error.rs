//! Structural errors raised by the estimation engine.
//!
//! Numerical outcomes of a fit (divergence, exhausted iteration budget)
//! are not errors; they are reported through `FitStatus`.

use plglmm_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GlmmError {
    #[error("Dimension mismatch in {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid random-effect groupings: {0}")]
    InvalidGroupings(String),

    #[error("{what} is computationally singular (reciprocal condition number {rcond:.3e})")]
    SingularMatrix { what: &'static str, rcond: f64 },

    #[error("Non-finite values in {0}")]
    NonFiniteInput(&'static str),

    #[error(transparent)]
    Linalg(#[from] LinalgError),
}

pub type Result<T> = std::result::Result<T, GlmmError>;

/// Fail with `DimensionMismatch` unless `got == expected`.
pub(crate) fn ensure_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(GlmmError::DimensionMismatch {
            what,
            expected,
            got,
        })
    }
}

/// Map a linear-algebra failure to `GlmmError`, naming the matrix when
/// it was singular.
pub(crate) fn singular_as(what: &'static str) -> impl FnOnce(LinalgError) -> GlmmError {
    move |e| match e {
        LinalgError::SingularMatrix { rcond } => GlmmError::SingularMatrix { what, rcond },
        other => other.into(),
    }
}
