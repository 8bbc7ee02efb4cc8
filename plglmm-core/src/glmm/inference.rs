//! Post-fit inference: fixed-effect standard errors and t-scores, and
//! the approximate covariance of the variance-component estimates.

use plglmm_linalg::decomposition::{inverse, inverse_checked, reciprocal_condition};
use plglmm_linalg::DenseMatrix;

use crate::error::{ensure_len, singular_as, GlmmError, Result};

/// Schur complements with a reciprocal condition number below this are
/// treated as singular.
pub const SCHUR_RCOND_THRESHOLD: f64 = 1e-12;

/// Standard errors of the `m` fixed effects from the coefficient matrix.
///
/// The random effects are absorbed through the Schur complement
/// `S = UL - UR LR^{-1} LL`; the errors are `sqrt(diag(S^{-1}))`.
pub fn standard_errors(coeff: &DenseMatrix, m: usize) -> Result<Vec<f64>> {
    let size = coeff.nrows();
    ensure_len("coefficient matrix columns", size, coeff.ncols())?;
    if m > size {
        return Err(GlmmError::DimensionMismatch {
            what: "fixed effects in coefficient matrix",
            expected: size,
            got: m,
        });
    }
    let s = size - m;
    let ul = coeff.block(0, 0, m, m);
    let schur = if s == 0 {
        ul
    } else {
        let ur = coeff.block(0, m, m, s);
        let ll = coeff.block(m, 0, s, m);
        let lr = coeff.block(m, m, s, s);
        let lr_inv = inverse_checked(&lr, f64::EPSILON)
            .map_err(singular_as("random-effect block of the coefficient matrix"))?;
        ul.sub(&ur.mat_mul(&lr_inv).mat_mul(&ll))
    };

    let rcond = reciprocal_condition(&schur)?;
    if rcond < SCHUR_RCOND_THRESHOLD {
        return Err(GlmmError::SingularMatrix {
            what: "standard error coefficient matrix",
            rcond,
        });
    }
    let schur_inv = inverse(&schur)?;
    Ok(schur_inv.diag().into_iter().map(f64::sqrt).collect())
}

/// Element-wise `beta / se`.
pub fn t_scores(beta: &[f64], se: &[f64]) -> Result<Vec<f64>> {
    ensure_len("standard errors", beta.len(), se.len())?;
    Ok(beta.iter().zip(se.iter()).map(|(b, s)| b / s).collect())
}

/// Approximate covariance of the variance components,
/// `2 / tr(VP_i VP_j)` for projected partials `VP_i`.
pub fn variance_covariance(vp: &[DenseMatrix]) -> DenseMatrix {
    let c = vp.len();
    let mut out = DenseMatrix::zeros(c, c);
    for i in 0..c {
        for j in i..c {
            let v = 2.0 / vp[i].trace_of_product(&vp[j]);
            out.set(i, j, v);
            out.set(j, i, v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_errors_without_random_effects() {
        // Pure fixed-effect system: SE = sqrt(diag(C^{-1}))
        let c = DenseMatrix::from_diag(&[4.0, 0.25]);
        let se = standard_errors(&c, 2).unwrap();
        assert!((se[0] - 0.5).abs() < 1e-12);
        assert!((se[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_schur_matches_block_of_inverse() {
        let c = DenseMatrix::from_row_major(
            3,
            3,
            &[4.0, 1.0, 0.5, 1.0, 3.0, 0.2, 0.5, 0.2, 2.0],
        );
        let se = standard_errors(&c, 1).unwrap();
        let full_inv = inverse(&c).unwrap();
        assert!((se[0] - full_inv.get(0, 0).sqrt()).abs() < 1e-12);
        assert!(se.iter().all(|&s| s >= 0.0));
    }

    #[test]
    fn test_singular_schur_is_fatal() {
        let c = DenseMatrix::from_row_major(3, 3, &[1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        match standard_errors(&c, 2) {
            Err(GlmmError::SingularMatrix { rcond, .. }) => assert!(rcond < SCHUR_RCOND_THRESHOLD),
            other => panic!("expected singular matrix error, got {:?}", other),
        }
    }

    #[test]
    fn test_t_scores() {
        let t = t_scores(&[1.0, -3.0], &[0.5, 1.5]).unwrap();
        assert_eq!(t, vec![2.0, -2.0]);
        assert!(matches!(
            t_scores(&[1.0, 2.0], &[1.0]),
            Err(GlmmError::DimensionMismatch { expected: 2, got: 1, .. })
        ));
    }

    #[test]
    fn test_variance_covariance_symmetric() {
        let a = DenseMatrix::identity(2);
        let b = DenseMatrix::from_diag(&[2.0, 2.0]);
        let v = variance_covariance(&[a, b]);
        assert!((v.get(0, 0) - 1.0).abs() < 1e-15);
        assert!((v.get(0, 1) - 0.5).abs() < 1e-15);
        assert_eq!(v.get(0, 1), v.get(1, 0));
    }
}
