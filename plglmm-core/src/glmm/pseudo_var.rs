//! Inversion of the pseudo-variance `V* = W + Z G Z'`.
//!
//! With `A = W^{-1}` already in hand the Woodbury identity gives
//!
//!   V*^{-1} = A - A Z G (I + Z' A Z G)^{-1} Z' A
//!
//! so only an `s x s` matrix is ever inverted.

use plglmm_linalg::decomposition::{inverse, pseudo_inverse, reciprocal_condition};
use plglmm_linalg::DenseMatrix;
use tracing::warn;

use crate::error::{ensure_len, Result};

/// Middle matrices with a reciprocal condition number below this are
/// pseudo-inverted.
pub const MIDDLE_RCOND_THRESHOLD: f64 = 1e-12;

/// Woodbury inverse of `A^{-1} + Z B Z'`.
///
/// `zta` must be `Z' A`. The products `Z B` and `Z' A Z` are independent
/// and are computed on two rayon tasks.
pub fn invert_pseudo_var(
    a: &DenseMatrix,
    b: &DenseMatrix,
    z: &DenseMatrix,
    zta: &DenseMatrix,
) -> Result<DenseMatrix> {
    let n = z.nrows();
    let s = z.ncols();
    ensure_len("A rows", n, a.nrows())?;
    ensure_len("A columns", n, a.ncols())?;
    ensure_len("B rows", s, b.nrows())?;
    ensure_len("B columns", s, b.ncols())?;
    ensure_len("Z'A rows", s, zta.nrows())?;
    ensure_len("Z'A columns", n, zta.ncols())?;

    let (zb, ztaz) = rayon::join(|| z.mat_mul(b), || zta.mat_mul(z));
    let mut mid = ztaz.mat_mul(b);
    mid.add_diag(&vec![1.0; s]);

    let rcond = reciprocal_condition(&mid)?;
    let mid_inv = if rcond < MIDDLE_RCOND_THRESHOLD {
        warn!(
            "Pseudovariance component matrix is computationally singular (rcond {:.3e}) - using pseudo-inverse",
            rcond
        );
        pseudo_inverse(&mid)?
    } else {
        inverse(&mid)?
    };

    let correction = a.mat_mul(&zb).mat_mul(&mid_inv.mat_mul(zta));
    Ok(a.sub(&correction))
}

/// Row-wise Sherman-Morrison refresh of a known inverse.
///
/// Row `k` of the result is row `k` of `(V + e_k b_k')^{-1}`, where
/// `V^{-1} = v_inv`, `e_k` is the k-th unit vector and `b_k'` is row `k`
/// of `b`.
pub fn k_rank_one_updates(v_inv: &DenseMatrix, b: &DenseMatrix) -> Result<DenseMatrix> {
    let n = v_inv.nrows();
    ensure_len("inverse columns", n, v_inv.ncols())?;
    ensure_len("update rows", n, b.nrows())?;
    ensure_len("update columns", n, b.ncols())?;

    let mut out = v_inv.clone();
    for k in 0..n {
        // v' A, as a row vector
        let va = v_inv.t_mat_vec(&b.row(k));
        let denom = 1.0 + va[k];
        let a_kk = v_inv.get(k, k);
        let row: Vec<f64> = (0..n)
            .map(|j| v_inv.get(k, j) - a_kk * va[j] / denom)
            .collect();
        out.set_row(k, &row);
    }
    Ok(out)
}
