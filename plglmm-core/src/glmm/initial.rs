//! Starting values from a fixed-effects-only log-link GLM.

use plglmm_linalg::decomposition::solve_spd;
use plglmm_linalg::DenseMatrix;
use tracing::debug;

use super::family::VarianceFamily;
use super::fit::InitialEstimates;
use crate::error::{ensure_len, GlmmError, Result};
use crate::util::math::all_finite;

/// Fit `log E[y] = offset + X beta` by iteratively reweighted least
/// squares and return `beta`.
pub fn fit_glm_irls(
    y: &[f64],
    x: &DenseMatrix,
    offsets: &[f64],
    family: VarianceFamily,
    disp: f64,
    max_iter: usize,
) -> Result<Vec<f64>> {
    let n = y.len();
    let p = x.ncols();
    ensure_len("design rows", n, x.nrows())?;
    ensure_len("offsets", n, offsets.len())?;
    if !all_finite(y) {
        return Err(GlmmError::NonFiniteInput("response"));
    }

    // Shift away from zero counts so the first linear predictor is finite
    let mut mu: Vec<f64> = y.iter().map(|&yi| yi + 0.1).collect();
    let mut eta: Vec<f64> = mu.iter().map(|m| m.ln()).collect();
    let mut beta = vec![0.0; p];

    for iter in 0..max_iter {
        // (dmu/deta)^2 / Var(Y) = mu^2 / Var(Y)
        let w: Vec<f64> = mu.iter().map(|&m| 1.0 / family.weight(m, disp)).collect();
        let z: Vec<f64> = (0..n)
            .map(|i| eta[i] - offsets[i] + (y[i] - mu[i]) / mu[i])
            .collect();

        let xtwx = x.xtwx(&w);
        let xtwz = x.xtwv(&w, &z);
        let beta_new = match solve_spd(&xtwx, &xtwz) {
            Ok(b) => b,
            Err(_) => {
                // Fallback: add small diagonal
                let mut xtwx_reg = xtwx.clone();
                xtwx_reg.add_diag(&vec![1e-6; p]);
                solve_spd(&xtwx_reg, &xtwz)?
            }
        };

        let xb = x.mat_vec(&beta_new);
        eta = (0..n).map(|i| offsets[i] + xb[i]).collect();
        mu = eta.iter().map(|e| e.exp()).collect();

        let change: f64 = beta_new
            .iter()
            .zip(beta.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        beta = beta_new;
        if change < 1e-8 {
            debug!("GLM initialisation converged after {} iterations", iter + 1);
            break;
        }
    }

    Ok(beta)
}

/// Initial state for a fit: GLM `beta`, zero random effects, the given
/// `sigma`, unit dispersion and `mu = exp(offset + X beta)`.
pub fn initial_estimates(
    y: &[f64],
    x: &DenseMatrix,
    n_random: usize,
    offsets: &[f64],
    sigma: Vec<f64>,
    family: VarianceFamily,
) -> Result<InitialEstimates> {
    let beta = fit_glm_irls(y, x, offsets, family, 1.0, 25)?;
    let xb = x.mat_vec(&beta);
    let mu = xb.iter().zip(offsets.iter()).map(|(a, o)| (a + o).exp()).collect();
    Ok(InitialEstimates {
        beta,
        u: vec![0.0; n_random],
        sigma,
        mu,
        dispersion: 1.0,
        g: None,
    })
}
