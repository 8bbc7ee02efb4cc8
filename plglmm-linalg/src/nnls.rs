#![allow(clippy::needless_range_loop)]
//! Non-negative least squares on the normal equations.
//!
//! Lawson-Hanson active set method, driven by a Gram matrix `A = X'X`
//! and right-hand side `b = X'y` rather than by the design itself, so a
//! caller whose regression has n^2 rows only ever materializes the
//! small p x p system. Supports warm starts from a previous solution.
//!
//! Reference: Lawson, C.L. and Hanson, R.J. (1974). "Solving Least
//! Squares Problems". Prentice-Hall.

use crate::decomposition::{pseudo_inverse, solve, LinalgError};
use crate::dense::DenseMatrix;

/// Passive entries at or below this are moved back to the active set.
const ZERO_TOL: f64 = 1e-14;

/// Options for [`nnls_gram`].
#[derive(Debug, Clone)]
pub struct NnlsOptions {
    /// Maximum number of outer (passive-set growth) iterations.
    pub max_iter: usize,
    /// KKT tolerance, relative to the largest |b| entry.
    pub tol: f64,
}

impl Default for NnlsOptions {
    fn default() -> Self {
        Self {
            max_iter: 500,
            tol: 1e-10,
        }
    }
}

/// Result of an NNLS solve.
#[derive(Debug, Clone)]
pub struct NnlsSolution {
    pub x: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize `x'Ax - 2 b'x` subject to `x >= 0`.
///
/// `start`, when given, seeds both the solution and the passive set
/// (its positive entries). Negative seed entries are clamped to zero.
pub fn nnls_gram(
    gram: &DenseMatrix,
    rhs: &[f64],
    start: Option<&[f64]>,
    options: &NnlsOptions,
) -> Result<NnlsSolution, LinalgError> {
    let p = rhs.len();
    if !gram.is_square() || gram.nrows() != p {
        return Err(LinalgError::DimensionMismatch {
            expected: p,
            got: gram.nrows(),
        });
    }
    let mut x = match start {
        Some(s) if s.len() != p => {
            return Err(LinalgError::DimensionMismatch {
                expected: p,
                got: s.len(),
            })
        }
        Some(s) => s.iter().map(|&v| v.max(0.0)).collect::<Vec<_>>(),
        None => vec![0.0; p],
    };

    let scale = rhs.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let tol = options.tol * scale;

    let mut passive: Vec<bool> = x.iter().map(|&v| v > 0.0).collect();
    if passive.iter().any(|&f| f) {
        restore_feasibility(gram, rhs, &mut x, &mut passive, options.max_iter)?;
    }

    let mut converged = false;
    let mut iterations = 0;
    for _ in 0..options.max_iter {
        iterations += 1;

        // Negative gradient of the objective: w = b - A x
        let ax = gram.mat_vec(&x);
        let w: Vec<f64> = (0..p).map(|j| rhs[j] - ax[j]).collect();

        let mut best: Option<usize> = None;
        let mut max_w = tol;
        for j in 0..p {
            if !passive[j] && w[j] > max_w {
                max_w = w[j];
                best = Some(j);
            }
        }
        let Some(idx) = best else {
            converged = true;
            break;
        };

        passive[idx] = true;
        restore_feasibility(gram, rhs, &mut x, &mut passive, options.max_iter)?;
    }

    Ok(NnlsSolution {
        x,
        iterations,
        converged,
    })
}

/// Inner Lawson-Hanson loop: solve on the passive set and step back
/// to the boundary until the passive solution is strictly positive.
fn restore_feasibility(
    gram: &DenseMatrix,
    rhs: &[f64],
    x: &mut [f64],
    passive: &mut [bool],
    max_iter: usize,
) -> Result<(), LinalgError> {
    let p = rhs.len();
    for _ in 0..max_iter {
        let idx: Vec<usize> = (0..p).filter(|&j| passive[j]).collect();
        if idx.is_empty() {
            return Ok(());
        }
        let z = solve_passive_set(gram, rhs, &idx)?;

        let mut alpha = 1.0_f64;
        let mut violated = false;
        for (k, &j) in idx.iter().enumerate() {
            if z[k] <= 0.0 {
                violated = true;
                let denom = x[j] - z[k];
                if denom > 0.0 {
                    alpha = alpha.min(x[j] / denom);
                } else {
                    alpha = 0.0;
                }
            }
        }

        if !violated {
            for (k, &j) in idx.iter().enumerate() {
                x[j] = z[k];
            }
            return Ok(());
        }

        for (k, &j) in idx.iter().enumerate() {
            x[j] += alpha * (z[k] - x[j]);
        }
        // The entry that set alpha lands on zero up to rounding.
        for &j in &idx {
            if x[j] <= ZERO_TOL {
                x[j] = 0.0;
                passive[j] = false;
            }
        }
    }
    Ok(())
}

/// Unconstrained solve of `A[P,P] z = b[P]`; singular sub-systems fall
/// back to the pseudo-inverse.
fn solve_passive_set(
    gram: &DenseMatrix,
    rhs: &[f64],
    idx: &[usize],
) -> Result<Vec<f64>, LinalgError> {
    let k = idx.len();
    let sub = DenseMatrix::from_fn(k, k, |a, b| gram.get(idx[a], idx[b]));
    let sub_rhs: Vec<f64> = idx.iter().map(|&j| rhs[j]).collect();
    match solve(&sub, &sub_rhs) {
        Ok(z) => Ok(z),
        Err(LinalgError::SingularMatrix { .. }) => Ok(pseudo_inverse(&sub)?.mat_vec(&sub_rhs)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gram_of(x: &DenseMatrix, y: &[f64]) -> (DenseMatrix, Vec<f64>) {
        (x.t_mat_mul(x), x.t_mat_vec(y))
    }

    #[test]
    fn test_unconstrained_optimum_is_returned() {
        // y = 1 + 2 t exactly, both coefficients positive
        let x = DenseMatrix::from_row_major(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = [1.0, 3.0, 5.0, 7.0];
        let (a, b) = gram_of(&x, &y);
        let sol = nnls_gram(&a, &b, None, &NnlsOptions::default()).unwrap();
        assert!(sol.converged);
        assert!((sol.x[0] - 1.0).abs() < 1e-8, "x0 = {}", sol.x[0]);
        assert!((sol.x[1] - 2.0).abs() < 1e-8, "x1 = {}", sol.x[1]);
    }

    #[test]
    fn test_negative_coefficient_is_clamped() {
        // y = 3 - t: the unconstrained slope is negative
        let x = DenseMatrix::from_row_major(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = [3.0, 2.0, 1.0, 0.0];
        let (a, b) = gram_of(&x, &y);
        let sol = nnls_gram(&a, &b, None, &NnlsOptions::default()).unwrap();
        assert!(sol.converged);
        assert_eq!(sol.x[1], 0.0);
        // With the slope pinned at zero the intercept is the mean of y.
        assert!((sol.x[0] - 1.5).abs() < 1e-8);
    }

    #[test]
    fn test_warm_start_reaches_same_solution() {
        let x = DenseMatrix::from_row_major(
            5,
            3,
            &[
                1.0, 0.2, 0.9, 1.0, 0.4, 0.1, 1.0, 0.8, 0.5, 1.0, 0.3, 0.7, 1.0, 0.9, 0.2,
            ],
        );
        let y = [1.0, 0.5, 2.0, 0.1, 1.5];
        let (a, b) = gram_of(&x, &y);
        let cold = nnls_gram(&a, &b, None, &NnlsOptions::default()).unwrap();
        let warm = nnls_gram(&a, &b, Some(&[0.5, -1.0, 0.5]), &NnlsOptions::default()).unwrap();
        for j in 0..3 {
            assert!(cold.x[j] >= 0.0);
            assert!((cold.x[j] - warm.x[j]).abs() < 1e-8);
        }
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(50))]

        #[test]
        fn prop_solution_satisfies_kkt(p in 1usize..6, seed in 0u64..1000) {
            use rand::{Rng, SeedableRng};
            let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
            let n = p + 4;
            let x = DenseMatrix::from_fn(n, p, |_, _| rng.gen::<f64>());
            let y: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
            let (a, b) = gram_of(&x, &y);
            let sol = nnls_gram(&a, &b, None, &NnlsOptions::default()).unwrap();
            proptest::prop_assert!(sol.converged);

            // x >= 0, gradient w = b - A x <= 0 on the active set, 0 on the passive set
            let ax = a.mat_vec(&sol.x);
            let scale = b.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
            for j in 0..p {
                let w = b[j] - ax[j];
                proptest::prop_assert!(sol.x[j] >= 0.0);
                if sol.x[j] > 0.0 {
                    proptest::prop_assert!(w.abs() < 1e-6 * scale, "w[{}] = {}", j, w);
                } else {
                    proptest::prop_assert!(w < 1e-6 * scale, "w[{}] = {}", j, w);
                }
            }
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = DenseMatrix::identity(2);
        assert!(nnls_gram(&a, &[1.0, 2.0, 3.0], None, &NnlsOptions::default()).is_err());
        assert!(nnls_gram(&a, &[1.0, 2.0], Some(&[1.0]), &NnlsOptions::default()).is_err());
    }
}
