//! Haseman-Elston moment estimators for the variance components.
//!
//! The outer product of the projected working response, `P y* (P y*)'`,
//! is regressed element-wise on an intercept and on the projected
//! partials `P dV_i P`. The regression has `n^2` rows, so it is solved
//! through its `(c+1) x (c+1)` normal equations.

use plglmm_linalg::decomposition::solve;
use plglmm_linalg::nnls::{nnls_gram, NnlsOptions};
use plglmm_linalg::DenseMatrix;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{ensure_len, singular_as, Result};

/// Normal equations of the Haseman-Elston regression. Index 0 is the
/// intercept; index `i + 1` is component `i`.
#[derive(Debug, Clone)]
pub struct HeNormalEquations {
    pub gram: DenseMatrix,
    pub rhs: Vec<f64>,
}

/// Build the normal equations from the projection `P`, the raw partials
/// `dV_i` and the working response.
pub fn he_normal_equations(
    p: &DenseMatrix,
    partials: &[DenseMatrix],
    ystar: &[f64],
) -> Result<HeNormalEquations> {
    let n = p.nrows();
    ensure_len("working response", n, ystar.len())?;
    for dv in partials {
        ensure_len("pseudo-variance partial", n, dv.nrows())?;
    }
    let c = partials.len();
    let py = p.mat_vec(ystar);
    let projected: Vec<DenseMatrix> = partials
        .par_iter()
        .map(|dv| p.mat_mul(dv).mat_mul(p))
        .collect();

    let mut gram = DenseMatrix::zeros(c + 1, c + 1);
    let mut rhs = vec![0.0; c + 1];
    gram.set(0, 0, (n * n) as f64);
    let sum_py: f64 = py.iter().sum();
    rhs[0] = sum_py * sum_py;
    for i in 0..c {
        let total = projected[i].sum();
        gram.set(0, i + 1, total);
        gram.set(i + 1, 0, total);
        rhs[i + 1] = projected[i].quad_form(&py, &py);
        for j in i..c {
            let v = projected[i].frobenius_inner(&projected[j]);
            gram.set(i + 1, j + 1, v);
            gram.set(j + 1, i + 1, v);
        }
    }
    Ok(HeNormalEquations { gram, rhs })
}

/// Unconstrained Haseman-Elston estimate of the `c` components. The
/// fitted intercept is discarded.
pub fn haseman_elston(
    p: &DenseMatrix,
    partials: &[DenseMatrix],
    ystar: &[f64],
) -> Result<Vec<f64>> {
    let eq = he_normal_equations(p, partials, ystar)?;
    let coef =
        solve(&eq.gram, &eq.rhs).map_err(singular_as("Haseman-Elston normal equations"))?;
    Ok(coef[1..].to_vec())
}

/// Non-negative Haseman-Elston estimate. Returns `c + 1` values with the
/// intercept first.
///
/// `start` (intercept first) warm-starts the active set search; the
/// driver passes the previous iteration's estimate.
pub fn haseman_elston_constrained(
    p: &DenseMatrix,
    partials: &[DenseMatrix],
    ystar: &[f64],
    start: Option<&[f64]>,
) -> Result<Vec<f64>> {
    let eq = he_normal_equations(p, partials, ystar)?;
    if let Some(s) = start {
        ensure_len("constrained start", eq.rhs.len(), s.len())?;
    }
    let sol = nnls_gram(&eq.gram, &eq.rhs, start, &NnlsOptions::default())?;
    if !sol.converged {
        warn!(
            "NNLS did not converge after {} iterations - using last feasible estimate",
            sol.iterations
        );
    }
    debug!("HE-NNLS finished in {} iterations", sol.iterations);
    Ok(sol.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Working response whose outer product is exactly `a + 2 dV_0`.
    fn exact_design() -> (DenseMatrix, Vec<DenseMatrix>, Vec<f64>) {
        let y = vec![1.0, -1.0, 2.0];
        let n = y.len();
        let outer = DenseMatrix::from_fn(n, n, |i, j| y[i] * y[j]);
        // Two partials: the outer product itself and the identity
        (DenseMatrix::identity(n), vec![outer, DenseMatrix::identity(n)], y)
    }

    #[test]
    fn test_exact_fit_recovers_slope() {
        let (p, partials, y) = exact_design();
        let sigma = haseman_elston(&p, &partials, &y).unwrap();
        assert_eq!(sigma.len(), 2);
        assert!((sigma[0] - 1.0).abs() < 1e-10, "sigma0 = {}", sigma[0]);
        assert!(sigma[1].abs() < 1e-10);
    }

    #[test]
    fn test_constrained_returns_intercept_first() {
        let (p, partials, y) = exact_design();
        let est = haseman_elston_constrained(&p, &partials, &y, None).unwrap();
        assert_eq!(est.len(), 3);
        assert!(est.iter().all(|&v| v >= 0.0));
        assert!((est[1] - 1.0).abs() < 1e-8);

        let warm = haseman_elston_constrained(&p, &partials, &y, Some(&est)).unwrap();
        for (a, b) in est.iter().zip(warm.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
        assert!(haseman_elston_constrained(&p, &partials, &y, Some(&[0.0])).is_err());
    }

    #[test]
    fn test_negative_slope_is_clamped() {
        // Response anti-correlated with the only partial
        let y = vec![1.0, -1.0];
        let dv = DenseMatrix::from_row_major(2, 2, &[0.0, 1.0, 1.0, 0.0]);
        let p = DenseMatrix::identity(2);
        let free = haseman_elston(&p, &[dv.clone()], &y).unwrap();
        assert!(free[0] < 0.0);
        let constrained = haseman_elston_constrained(&p, &[dv], &y, None).unwrap();
        assert_eq!(constrained[1], 0.0);
    }
}
