//! Matrix inversion, conditioning and decompositions.
//!
//! Thin wrappers around faer's LU, Cholesky and SVD. Conditioning is reported as the reciprocal
//! condition number `s_min / s_max` so callers can compare it against
//! their own singularity thresholds.

use faer::linalg::solvers::{DenseSolveCore, Solve};
use faer::{Mat, Side};
use thiserror::Error;

use crate::dense::DenseMatrix;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinalgError {
    #[error("Matrix is computationally singular (reciprocal condition number {rcond:.3e})")]
    SingularMatrix { rcond: f64 },

    #[error("Matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("Matrix must be square, got {nrows} x {ncols}")]
    NotSquare { nrows: usize, ncols: usize },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("{0} did not converge")]
    DecompositionFailed(&'static str),
}

fn ensure_square(a: &DenseMatrix) -> Result<(), LinalgError> {
    if a.is_square() {
        Ok(())
    } else {
        Err(LinalgError::NotSquare {
            nrows: a.nrows(),
            ncols: a.ncols(),
        })
    }
}

/// Reciprocal condition number `s_min / s_max` in the 2-norm.
///
/// Returns NaN when `a` has non-finite entries, 0 for the zero matrix
/// and 1 for an empty matrix.
pub fn reciprocal_condition(a: &DenseMatrix) -> Result<f64, LinalgError> {
    ensure_square(a)?;
    if a.nrows() == 0 {
        return Ok(1.0);
    }
    if !a.is_finite() {
        return Ok(f64::NAN);
    }
    let sv = a
        .as_faer()
        .singular_values()
        .map_err(|_| LinalgError::DecompositionFailed("singular value decomposition"))?;
    let s_max = sv.iter().cloned().fold(0.0_f64, f64::max);
    let s_min = sv.iter().cloned().fold(f64::INFINITY, f64::min);
    if s_max == 0.0 {
        return Ok(0.0);
    }
    Ok(s_min / s_max)
}

/// Inverse via partially pivoted LU. No conditioning check.
pub fn inverse(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    ensure_square(a)?;
    let lu = a.as_faer().partial_piv_lu();
    Ok(DenseMatrix::from_faer(lu.inverse()))
}

/// Inverse that refuses matrices whose reciprocal condition number is
/// below `threshold`.
///
/// A NaN condition number (non-finite input) is not treated as singular;
/// the NaNs flow through into the result for the caller to detect.
pub fn inverse_checked(a: &DenseMatrix, threshold: f64) -> Result<DenseMatrix, LinalgError> {
    let rcond = reciprocal_condition(a)?;
    if rcond < threshold {
        return Err(LinalgError::SingularMatrix { rcond });
    }
    inverse(a)
}

/// Moore-Penrose pseudo-inverse via the SVD.
pub fn pseudo_inverse(a: &DenseMatrix) -> Result<DenseMatrix, LinalgError> {
    let svd = a
        .as_faer()
        .svd()
        .map_err(|_| LinalgError::DecompositionFailed("singular value decomposition"))?;
    Ok(DenseMatrix::from_faer(svd.pseudoinverse()))
}

/// Solve `a x = b` by LU, refusing singular systems.
pub fn solve(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    ensure_square(a)?;
    if b.len() != a.nrows() {
        return Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            got: b.len(),
        });
    }
    let rcond = reciprocal_condition(a)?;
    if rcond < f64::EPSILON {
        return Err(LinalgError::SingularMatrix { rcond });
    }
    let rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
    let x = a.as_faer().partial_piv_lu().solve(&rhs);
    Ok((0..b.len()).map(|i| x[(i, 0)]).collect())
}

/// Solve a symmetric positive definite system by Cholesky.
pub fn solve_spd(a: &DenseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    ensure_square(a)?;
    if b.len() != a.nrows() {
        return Err(LinalgError::DimensionMismatch {
            expected: a.nrows(),
            got: b.len(),
        });
    }
    let llt = a
        .as_faer()
        .llt(Side::Lower)
        .map_err(|_| LinalgError::NotPositiveDefinite)?;
    let rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
    let x = llt.solve(&rhs);
    Ok((0..b.len()).map(|i| x[(i, 0)]).collect())
}
