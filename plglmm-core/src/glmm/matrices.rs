//! Per-iteration working quantities of the pseudo-likelihood linearization.
//!
//! With the log link, `D = diag(mu)` is both the mean matrix and the
//! derivative d(mu)/d(eta), so every matrix here except the pseudo-variance
//! and the REML projection is diagonal and kept as a vector.

use plglmm_linalg::decomposition::inverse_checked;
use plglmm_linalg::DenseMatrix;

use super::family::VarianceFamily;
use crate::error::{ensure_len, singular_as, Result};

/// Linear predictor `offset + X beta + Z u`.
pub fn linear_predictor(
    x: &DenseMatrix,
    z: &DenseMatrix,
    beta: &[f64],
    u: &[f64],
    offsets: &[f64],
) -> Result<Vec<f64>> {
    ensure_len("fixed effects", x.ncols(), beta.len())?;
    ensure_len("random effects", z.ncols(), u.len())?;
    ensure_len("offsets", x.nrows(), offsets.len())?;
    let xb = x.mat_vec(beta);
    let zu = z.mat_vec(u);
    Ok((0..offsets.len())
        .map(|i| offsets[i] + xb[i] + zu[i])
        .collect())
}

/// Fitted means `mu = exp(offset + X beta + Z u)`.
pub fn fitted_means(
    x: &DenseMatrix,
    z: &DenseMatrix,
    beta: &[f64],
    u: &[f64],
    offsets: &[f64],
) -> Result<Vec<f64>> {
    Ok(linear_predictor(x, z, beta, u, offsets)?
        .into_iter()
        .map(f64::exp)
        .collect())
}

/// Working response `y* = X beta + Z u + D^{-1} (y - mu)`.
///
/// Offsets enter through `mu` only.
pub fn working_response(
    x: &DenseMatrix,
    z: &DenseMatrix,
    beta: &[f64],
    u: &[f64],
    y: &[f64],
    mu: &[f64],
) -> Result<Vec<f64>> {
    let n = x.nrows();
    ensure_len("response", n, y.len())?;
    ensure_len("fitted means", n, mu.len())?;
    let eta = linear_predictor(x, z, beta, u, &vec![0.0; n])?;
    Ok((0..n).map(|i| eta[i] + (y[i] - mu[i]) / mu[i]).collect())
}

/// Diagonal of the mean-variance matrix `Vmu`.
pub fn mean_variance(mu: &[f64], disp: f64, family: VarianceFamily) -> Vec<f64> {
    mu.iter().map(|&m| family.variance(m, disp)).collect()
}

/// Diagonal of the weight matrix `W = D^{-1} Vmu D^{-1}`.
pub fn weight_diag(mu: &[f64], vmu: &[f64]) -> Vec<f64> {
    mu.iter().zip(vmu.iter()).map(|(&m, &v)| v / (m * m)).collect()
}

/// Element-wise reciprocal of a diagonal.
pub fn invert_diag(d: &[f64]) -> Vec<f64> {
    d.iter().map(|&v| 1.0 / v).collect()
}

/// Dense pseudo-variance `V* = Z G Z' + diag(w)`.
///
/// The fit itself never forms this matrix; it is provided for callers
/// and diagnostics that need it explicitly.
pub fn pseudo_variance(z: &DenseMatrix, g: &DenseMatrix, w: &[f64]) -> Result<DenseMatrix> {
    ensure_len("variance-component matrix", z.ncols(), g.nrows())?;
    ensure_len("weights", z.nrows(), w.len())?;
    let mut v = z.mat_mul(g).mat_mul_t(z);
    v.add_diag(w);
    Ok(v)
}

/// REML projection `P = V^{-1} - V^{-1} X (X' V^{-1} X)^{-1} X' V^{-1}`.
pub fn reml_projection(v_inv: &DenseMatrix, x: &DenseMatrix) -> Result<DenseMatrix> {
    ensure_len("inverse pseudo-variance", x.nrows(), v_inv.nrows())?;
    let vx = v_inv.mat_mul(x);
    let xtvx = x.t_mat_mul(&vx);
    let xtvx_inv = inverse_checked(&xtvx, f64::EPSILON).map_err(singular_as("X' V*^-1 X"))?;
    Ok(v_inv.sub(&vx.mat_mul(&xtvx_inv).mat_mul_t(&vx)))
}
