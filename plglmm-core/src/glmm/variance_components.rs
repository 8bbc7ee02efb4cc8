//! Score and expected information for the variance components, and the
//! Fisher scoring update built on them.

use plglmm_linalg::decomposition::inverse_checked;
use plglmm_linalg::DenseMatrix;
use rayon::prelude::*;

use crate::error::{ensure_len, singular_as, Result};

/// Score vector and expected information matrix over the `c` components.
#[derive(Debug, Clone)]
pub struct ScoreInformation {
    pub score: Vec<f64>,
    pub information: DenseMatrix,
}

/// REML score and information.
///
/// `vp[i]` is the projected partial `P dV_i`. Then
/// `score_i = -tr(P dV_i)/2 + y*' P dV_i P y* / 2` and
/// `info_ij = tr(P dV_i P dV_j)/2`.
pub fn reml_score_information(
    vp: &[DenseMatrix],
    ystar: &[f64],
    p: &DenseMatrix,
) -> Result<ScoreInformation> {
    ensure_len("working response", p.nrows(), ystar.len())?;
    let py = p.mat_vec(ystar);
    Ok(score_information(vp, ystar, &py))
}

/// Pseudo-likelihood (non-REML) score and information.
///
/// `vp[i]` is `V*^{-1} dV_i`, and the residual `r = y* - X beta` stands in
/// for `y*`.
pub fn pl_score_information(
    vp: &[DenseMatrix],
    ystar: &[f64],
    x: &DenseMatrix,
    beta: &[f64],
    v_inv: &DenseMatrix,
) -> Result<ScoreInformation> {
    ensure_len("working response", x.nrows(), ystar.len())?;
    ensure_len("fixed effects", x.ncols(), beta.len())?;
    let xb = x.mat_vec(beta);
    let r: Vec<f64> = ystar.iter().zip(xb.iter()).map(|(a, b)| a - b).collect();
    let vr = v_inv.mat_vec(&r);
    Ok(score_information(vp, &r, &vr))
}

/// Shared form: `score_i = -tr(M_i)/2 + r' M_i q / 2` and
/// `info_ij = tr(M_i M_j)/2`, with `q` the projected residual.
fn score_information(vp: &[DenseMatrix], r: &[f64], q: &[f64]) -> ScoreInformation {
    let c = vp.len();
    let score: Vec<f64> = vp
        .par_iter()
        .map(|m| -0.5 * m.trace() + 0.5 * m.quad_form(r, q))
        .collect();

    // Symmetric: only the upper triangle is computed.
    let pairs: Vec<(usize, usize)> = (0..c).flat_map(|i| (i..c).map(move |j| (i, j))).collect();
    let entries: Vec<f64> = pairs
        .par_iter()
        .map(|&(i, j)| 0.5 * vp[i].trace_of_product(&vp[j]))
        .collect();
    let mut information = DenseMatrix::zeros(c, c);
    for (&(i, j), &v) in pairs.iter().zip(entries.iter()) {
        information.set(i, j, v);
        information.set(j, i, v);
    }

    ScoreInformation { score, information }
}

/// Newton step `sigma + information^{-1} score`.
pub fn fisher_score(information: &DenseMatrix, score: &[f64], sigma: &[f64]) -> Result<Vec<f64>> {
    ensure_len("score", sigma.len(), score.len())?;
    ensure_len("information", sigma.len(), information.nrows())?;
    let info_inv = inverse_checked(information, f64::EPSILON)
        .map_err(singular_as("variance-component information matrix"))?;
    let step = info_inv.mat_vec(score);
    Ok(sigma.iter().zip(step.iter()).map(|(s, d)| s + d).collect())
}
