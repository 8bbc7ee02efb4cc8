//! Henderson's mixed model equations.
//!
//! ```text
//! [ X' R X    X' R Z       ] [beta]   [X' R y*]
//! [ Z' R X    Z' R Z + G^-1] [ u  ] = [Z' R y*]
//! ```
//!
//! with `R = diag(winv)` the inverse of the pseudo-likelihood weight
//! matrix. The solution stacks `beta` (first `m`) before `u` (last `s`).
//!
//! Random effects of a zero variance component are pinned at zero and
//! left out of the system, so only the active columns of `Z` and the
//! matching block of `G^-1` enter the equations.

use plglmm_linalg::decomposition::inverse_checked;
use plglmm_linalg::DenseMatrix;

use crate::error::{ensure_len, singular_as, GlmmError, Result};

/// Columns of `Z` and the block of `G^-1` that enter the equations.
#[derive(Debug, Clone)]
pub struct ActiveEffects {
    /// Retained column indices of the full `Z`, ascending within each
    /// grouping.
    pub columns: Vec<usize>,
    pub z: DenseMatrix,
    pub g_inv: DenseMatrix,
}

impl ActiveEffects {
    /// Restrict `z` and `g_inv` to `columns`.
    pub fn select(z: &DenseMatrix, g_inv: &DenseMatrix, columns: Vec<usize>) -> Result<Self> {
        ensure_len("G^-1 dimension", z.ncols(), g_inv.nrows())?;
        if let Some(&j) = columns.iter().find(|&&j| j >= z.ncols()) {
            return Err(GlmmError::DimensionMismatch {
                what: "active random-effect column",
                expected: z.ncols(),
                got: j,
            });
        }
        let k = columns.len();
        let z_active = z.select_columns(&columns);
        let g_inv_active = DenseMatrix::from_fn(k, k, |a, b| g_inv.get(columns[a], columns[b]));
        Ok(Self {
            columns,
            z: z_active,
            g_inv: g_inv_active,
        })
    }

    /// Number of retained random effects.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Expand a solution of the reduced system to the full `[beta; u]` with
/// `s` random effects; effects outside `columns` are zero.
pub fn scatter_theta(solution: &[f64], m: usize, columns: &[usize], s: usize) -> Result<Vec<f64>> {
    ensure_len("reduced parameter vector", m + columns.len(), solution.len())?;
    let mut theta = vec![0.0; m + s];
    theta[..m].copy_from_slice(&solution[..m]);
    for (&j, &v) in columns.iter().zip(&solution[m..]) {
        theta[m + j] = v;
    }
    Ok(theta)
}

/// Assemble the `(m+s) x (m+s)` coefficient matrix.
pub fn coefficient_matrix(
    x: &DenseMatrix,
    winv: &[f64],
    z: &DenseMatrix,
    g_inv: &DenseMatrix,
) -> Result<DenseMatrix> {
    let n = x.nrows();
    ensure_len("Z rows", n, z.nrows())?;
    ensure_len("inverse weights", n, winv.len())?;
    ensure_len("G^-1 dimension", z.ncols(), g_inv.nrows())?;

    let rx = x.scale_rows(winv);
    let rz = z.scale_rows(winv);
    let ul = x.t_mat_mul(&rx);
    let ur = x.t_mat_mul(&rz);
    let ll = ur.transpose();
    let lr = z.t_mat_mul(&rz).add(g_inv);
    Ok(DenseMatrix::from_blocks(&ul, &ur, &ll, &lr))
}

/// Solve the equations for the stacked `[beta; u]` by direct inversion
/// of the coefficient matrix.
pub fn solve_mme(
    coeff: &DenseMatrix,
    x: &DenseMatrix,
    z: &DenseMatrix,
    winv: &[f64],
    ystar: &[f64],
) -> Result<Vec<f64>> {
    let n = x.nrows();
    ensure_len("working response", n, ystar.len())?;
    ensure_len("inverse weights", n, winv.len())?;
    ensure_len("coefficient matrix", x.ncols() + z.ncols(), coeff.nrows())?;

    let mut rhs = x.xtwv(winv, ystar);
    rhs.extend(z.xtwv(winv, ystar));

    // Overflowing weights leave nothing to solve; NaNs tell the driver
    // the fit has diverged.
    if !coeff.is_finite() {
        return Ok(vec![f64::NAN; coeff.nrows()]);
    }
    let coeff_inv = inverse_checked(coeff, f64::EPSILON)
        .map_err(singular_as("mixed model coefficient matrix"))?;
    Ok(coeff_inv.mat_vec(&rhs))
}

/// Split `theta` into `(beta, u)` at index `m`.
pub fn split_theta(theta: &[f64], m: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    if m > theta.len() {
        return Err(GlmmError::DimensionMismatch {
            what: "parameter vector",
            expected: m,
            got: theta.len(),
        });
    }
    Ok((theta[..m].to_vec(), theta[m..].to_vec()))
}
