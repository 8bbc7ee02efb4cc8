//! Partial derivatives of the pseudo-variance with respect to each
//! variance component.

use plglmm_linalg::DenseMatrix;

use super::covariance::Groupings;
use crate::error::{ensure_len, Result};

/// `dV*/dsigma_i`: `Z_i Z_i'` for ordinary groupings and `Z_c K Z_c'`
/// for the kinship grouping.
///
/// These depend only on the design, so the driver builds them once.
pub fn pseudovar_partials(
    z: &DenseMatrix,
    k: &DenseMatrix,
    groupings: &Groupings,
) -> Result<Vec<DenseMatrix>> {
    let last = groupings.kinship_grouping();
    groupings
        .indices
        .iter()
        .enumerate()
        .map(|(i, idx)| {
            let zi = z.select_columns(idx);
            if i == last {
                ensure_len("kinship dimension", idx.len(), k.nrows())?;
                Ok(zi.mat_mul(k).mat_mul_t(&zi))
            } else {
                Ok(zi.mat_mul_t(&zi))
            }
        })
        .collect()
}

/// Left-multiply every partial by `proj` (`P` under REML, `V*^{-1}`
/// otherwise).
pub fn project_partials(partials: &[DenseMatrix], proj: &DenseMatrix) -> Vec<DenseMatrix> {
    partials.iter().map(|dv| proj.mat_mul(dv)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partials_shapes_and_values() {
        // 4 observations, 2-level batch then one kinship column per observation
        let n = 4;
        let z = DenseMatrix::from_fn(n, 2 + n, |i, j| {
            if j < 2 {
                if i % 2 == j { 1.0 } else { 0.0 }
            } else if j - 2 == i {
                1.0
            } else {
                0.0
            }
        });
        let k = DenseMatrix::from_fn(n, n, |i, j| if i == j { 1.0 } else { 0.1 });
        let groupings = Groupings::contiguous(&["batch", "kinship"], &[2, n]).unwrap();
        let dv = pseudovar_partials(&z, &k, &groupings).unwrap();
        assert_eq!(dv.len(), 2);
        // Same batch -> 1, different batch -> 0
        assert_eq!(dv[0].get(0, 2), 1.0);
        assert_eq!(dv[0].get(0, 1), 0.0);
        // Z_c = I, so the kinship partial is K itself
        assert!(dv[1].max_abs_diff(&k) < 1e-15);

        let proj = DenseMatrix::identity(n).scale(2.0);
        let vp = project_partials(&dv, &proj);
        assert!((vp[1].get(0, 1) - 0.2).abs() < 1e-15);
    }
}
