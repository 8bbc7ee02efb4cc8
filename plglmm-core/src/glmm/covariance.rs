//! Random-effect groupings and the broadcast variance-component matrices.
//!
//! Each variance component owns a contiguous or scattered set of columns
//! of `Z`. Ordinary groupings get an i.i.d. covariance `sigma_i * I`; the
//! last grouping is tied to the known kinship `K` and gets `sigma_c * K`.

use plglmm_linalg::decomposition::{inverse_checked, pseudo_inverse, reciprocal_condition};
use plglmm_linalg::{DenseMatrix, LinalgError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ensure_len, GlmmError, Result};

/// Kinship matrices with a reciprocal condition number below this are
/// inverted block-wise.
pub const KINSHIP_RCOND_THRESHOLD: f64 = 1e-9;

/// Mapping from each variance component to its columns of `Z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Groupings {
    /// Grouping (random-effect variable) names.
    pub names: Vec<String>,
    /// Column indices of `Z`, one list per grouping.
    pub indices: Vec<Vec<usize>>,
    /// Level labels, aligned with `indices`.
    pub levels: Vec<Vec<String>>,
}

impl Groupings {
    pub fn new(names: Vec<String>, indices: Vec<Vec<usize>>, levels: Vec<Vec<String>>) -> Result<Self> {
        if indices.is_empty() {
            return Err(GlmmError::InvalidGroupings(
                "at least one grouping (the kinship term) is required".into(),
            ));
        }
        ensure_len("grouping names", indices.len(), names.len())?;
        ensure_len("grouping levels", indices.len(), levels.len())?;
        for (i, (idx, lv)) in indices.iter().zip(levels.iter()).enumerate() {
            if idx.len() != lv.len() {
                return Err(GlmmError::InvalidGroupings(format!(
                    "grouping '{}' has {} columns but {} level labels",
                    names[i],
                    idx.len(),
                    lv.len()
                )));
            }
        }
        Ok(Self {
            names,
            indices,
            levels,
        })
    }

    /// Groupings laid out left to right with the given widths; levels are
    /// labelled `1..=width`.
    pub fn contiguous(names: &[&str], widths: &[usize]) -> Result<Self> {
        let mut start = 0;
        let mut indices = Vec::with_capacity(widths.len());
        let mut levels = Vec::with_capacity(widths.len());
        for &w in widths {
            indices.push((start..start + w).collect());
            levels.push((1..=w).map(|l| l.to_string()).collect());
            start += w;
        }
        Self::new(names.iter().map(|s| s.to_string()).collect(), indices, levels)
    }

    /// Number of variance components.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Total number of random-effect columns.
    pub fn n_columns(&self) -> usize {
        self.indices.iter().map(Vec::len).sum()
    }

    /// Index of the kinship-linked grouping (always the last).
    pub fn kinship_grouping(&self) -> usize {
        self.indices.len() - 1
    }

    /// Check the groupings against `Z` with `s` columns and a kinship of
    /// dimension `k_dim`: every grouping owns at least one column, the
    /// indices partition `0..s` and the last grouping is as wide as the
    /// kinship.
    pub fn validate(&self, s: usize, k_dim: usize) -> Result<()> {
        let mut seen = vec![false; s];
        for (g, idx) in self.indices.iter().enumerate() {
            if idx.is_empty() {
                return Err(GlmmError::InvalidGroupings(format!(
                    "grouping '{}' has no columns",
                    self.names[g]
                )));
            }
            for &j in idx {
                if j >= s {
                    return Err(GlmmError::InvalidGroupings(format!(
                        "grouping '{}' references column {} but Z has {} columns",
                        self.names[g], j, s
                    )));
                }
                if seen[j] {
                    return Err(GlmmError::InvalidGroupings(format!(
                        "column {} is claimed by more than one grouping",
                        j
                    )));
                }
                seen[j] = true;
            }
        }
        if let Some(j) = seen.iter().position(|&f| !f) {
            return Err(GlmmError::InvalidGroupings(format!(
                "column {} of Z belongs to no grouping",
                j
            )));
        }
        let last = &self.indices[self.kinship_grouping()];
        if last.len() != k_dim {
            return Err(GlmmError::DimensionMismatch {
                what: "kinship grouping width",
                expected: k_dim,
                got: last.len(),
            });
        }
        Ok(())
    }

    /// Columns of `Z` whose grouping has a positive variance component,
    /// in grouping order. Columns of zero components are left out.
    pub fn active_columns(&self, sigma: &[f64]) -> Vec<usize> {
        self.indices
            .iter()
            .zip(sigma)
            .filter(|(_, &s)| s > 0.0)
            .flat_map(|(idx, _)| idx.iter().copied())
            .collect()
    }

    /// Split a stacked random-effect vector into per-grouping pieces.
    pub fn split(&self, u: &[f64]) -> Vec<Vec<f64>> {
        self.indices
            .iter()
            .map(|idx| idx.iter().map(|&j| u[j]).collect())
            .collect()
    }
}

/// Broadcast `sigma` to the full `s x s` random-effect covariance `G`.
pub fn broadcast_g(groupings: &Groupings, sigma: &[f64], k: &DenseMatrix) -> Result<DenseMatrix> {
    broadcast(groupings, sigma, k, |s| s)
}

/// Inverse of the broadcast covariance: `1/sigma_i` on ordinary
/// groupings and `K^{-1} / sigma_c` on the kinship grouping.
///
/// A zero component has no inverse; its block is left at zero, which
/// makes the result the pseudo-inverse of `G`. Those columns must be
/// kept out of the mixed model equations (see [`Groupings::active_columns`]).
pub fn broadcast_g_inv(
    groupings: &Groupings,
    sigma: &[f64],
    k_inv: &DenseMatrix,
) -> Result<DenseMatrix> {
    broadcast(groupings, sigma, k_inv, |s| if s > 0.0 { 1.0 / s } else { 0.0 })
}

fn broadcast(
    groupings: &Groupings,
    sigma: &[f64],
    kin: &DenseMatrix,
    scale: impl Fn(f64) -> f64,
) -> Result<DenseMatrix> {
    ensure_len("variance components", groupings.len(), sigma.len())?;
    let s = groupings.n_columns();
    let mut g = DenseMatrix::zeros(s, s);
    let last = groupings.kinship_grouping();
    for (i, idx) in groupings.indices.iter().enumerate() {
        let f = scale(sigma[i]);
        if i == last {
            ensure_len("kinship dimension", idx.len(), kin.nrows())?;
            for (a, &ja) in idx.iter().enumerate() {
                for (b, &jb) in idx.iter().enumerate() {
                    g.set(ja, jb, f * kin.get(a, b));
                }
            }
        } else {
            for &j in idx {
                g.set(j, j, f);
            }
        }
    }
    Ok(g)
}

/// Inverted kinship, with a flag for the block-wise fallback.
#[derive(Debug, Clone)]
pub struct KinshipInverse {
    pub inverse: DenseMatrix,
    pub rcond: f64,
    pub block_fallback: bool,
}

/// Invert the kinship once for the whole fit.
///
/// A computationally singular kinship (rcond below
/// [`KINSHIP_RCOND_THRESHOLD`]) is assumed to have a repeated block
/// structure and goes through [`broadcast_block_inverse`] with half its
/// dimension as the block size.
pub fn invert_kinship(k: &DenseMatrix) -> Result<KinshipInverse> {
    if !k.is_square() {
        return Err(LinalgError::NotSquare {
            nrows: k.nrows(),
            ncols: k.ncols(),
        }
        .into());
    }
    if !k.is_finite() {
        return Err(GlmmError::NonFiniteInput("kinship matrix"));
    }
    let rcond = reciprocal_condition(k)?;
    if rcond < KINSHIP_RCOND_THRESHOLD {
        let block = (k.nrows() / 2).max(1);
        warn!(
            "Kinship is computationally singular (rcond {:.3e}) - using broadcast inverse with block size {}",
            rcond, block
        );
        return Ok(KinshipInverse {
            inverse: broadcast_block_inverse(k, block)?,
            rcond,
            block_fallback: true,
        });
    }
    Ok(KinshipInverse {
        inverse: inverse_checked(k, KINSHIP_RCOND_THRESHOLD)?,
        rcond,
        block_fallback: false,
    })
}

/// Invert the leading `block x block` sub-matrix and repeat it down the
/// diagonal. A trailing partial block is pseudo-inverted on its own.
pub fn broadcast_block_inverse(k: &DenseMatrix, block: usize) -> Result<DenseMatrix> {
    let n = k.nrows();
    if block == 0 || block > n {
        return Err(GlmmError::DimensionMismatch {
            what: "broadcast inverse block size",
            expected: n,
            got: block,
        });
    }
    let lead = k.block(0, 0, block, block);
    let lead_inv = match inverse_checked(&lead, KINSHIP_RCOND_THRESHOLD) {
        Ok(inv) => inv,
        Err(LinalgError::SingularMatrix { rcond }) => {
            warn!(
                "Leading kinship block is singular (rcond {:.3e}) - using pseudo-inverse",
                rcond
            );
            pseudo_inverse(&lead)?
        }
        Err(e) => return Err(e.into()),
    };

    let mut out = DenseMatrix::zeros(n, n);
    let full_blocks = n / block;
    for b in 0..full_blocks {
        out.set_block(b * block, b * block, &lead_inv);
    }
    let done = full_blocks * block;
    if done < n {
        let rest = k.block(done, done, n - done, n - done);
        out.set_block(done, done, &pseudo_inverse(&rest)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groupings() -> Groupings {
        Groupings::contiguous(&["batch", "kinship"], &[2, 3]).unwrap()
    }

    #[test]
    fn test_validate_partition() {
        let g = two_groupings();
        assert!(g.validate(5, 3).is_ok());
        assert!(g.validate(6, 3).is_err());
        assert!(g.validate(5, 4).is_err());

        let overlapping = Groupings::new(
            vec!["a".into(), "b".into()],
            vec![vec![0, 1], vec![1, 2]],
            vec![vec!["x".into(), "y".into()], vec!["x".into(), "y".into()]],
        )
        .unwrap();
        assert!(matches!(
            overlapping.validate(3, 2),
            Err(GlmmError::InvalidGroupings(_))
        ));
    }

    #[test]
    fn test_empty_grouping_rejected() {
        let g = Groupings::contiguous(&["batch", "kinship"], &[0, 3]).unwrap();
        match g.validate(3, 3) {
            Err(GlmmError::InvalidGroupings(msg)) => assert!(msg.contains("batch")),
            other => panic!("expected invalid groupings, got {:?}", other),
        }
    }

    #[test]
    fn test_active_columns_skip_zero_components() {
        let g = two_groupings();
        assert_eq!(g.active_columns(&[2.0, 0.5]), vec![0, 1, 2, 3, 4]);
        assert_eq!(g.active_columns(&[0.0, 0.5]), vec![2, 3, 4]);
        assert_eq!(g.active_columns(&[1.0, 0.0]), vec![0, 1]);
        assert!(g.active_columns(&[0.0, 0.0]).is_empty());
    }

    #[test]
    fn test_zero_component_inverse_is_pseudo_inverse() {
        let g = two_groupings();
        let k = DenseMatrix::identity(3);
        let sigma = [0.0, 0.5];
        let big_g = broadcast_g(&g, &sigma, &k).unwrap();
        let big_g_inv = broadcast_g_inv(&g, &sigma, &k).unwrap();
        assert!(big_g_inv.is_finite());
        assert_eq!(big_g_inv.get(0, 0), 0.0);
        assert_eq!(big_g_inv.get(2, 2), 2.0);
        // G G+ G = G
        let back = big_g.mat_mul(&big_g_inv).mat_mul(&big_g);
        assert!(back.max_abs_diff(&big_g) < 1e-12);
    }

    #[test]
    fn test_level_count_must_match() {
        let err = Groupings::new(vec!["a".into()], vec![vec![0, 1]], vec![vec!["x".into()]]);
        assert!(err.is_err());
    }

    #[test]
    fn test_broadcast_g_and_inverse() {
        let g = two_groupings();
        let k = DenseMatrix::from_row_major(3, 3, &[1.0, 0.5, 0.0, 0.5, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let k_inv = invert_kinship(&k).unwrap();
        assert!(!k_inv.block_fallback);
        let sigma = [2.0, 0.5];
        let big_g = broadcast_g(&g, &sigma, &k).unwrap();
        let big_g_inv = broadcast_g_inv(&g, &sigma, &k_inv.inverse).unwrap();
        assert_eq!(big_g.get(1, 1), 2.0);
        assert_eq!(big_g.get(2, 3), 0.25);
        assert_eq!(big_g.get(0, 2), 0.0);
        let prod = big_g.mat_mul(&big_g_inv);
        assert!(prod.max_abs_diff(&DenseMatrix::identity(5)) < 1e-12);
    }

    #[test]
    fn test_split() {
        let g = two_groupings();
        let parts = g.split(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(parts, vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]]);
    }

    #[test]
    fn test_singular_kinship_uses_block_inverse() {
        // Two copies of a 2x2 block, second copy zeroed: rank 2 of 4
        let mut k = DenseMatrix::zeros(4, 4);
        let lead = DenseMatrix::from_row_major(2, 2, &[1.0, 0.25, 0.25, 1.0]);
        k.set_block(0, 0, &lead);
        let inv = invert_kinship(&k).unwrap();
        assert!(inv.block_fallback);
        assert!(inv.rcond < KINSHIP_RCOND_THRESHOLD);
        let lead_inv = plglmm_linalg::decomposition::inverse(&lead).unwrap();
        assert!(inv.inverse.block(0, 0, 2, 2).max_abs_diff(&lead_inv) < 1e-12);
        assert!(inv.inverse.block(2, 2, 2, 2).max_abs_diff(&lead_inv) < 1e-12);
        assert_eq!(inv.inverse.get(0, 2), 0.0);
    }

    #[test]
    fn test_block_inverse_with_remainder() {
        let k = DenseMatrix::from_diag(&[2.0, 2.0, 4.0]);
        let inv = broadcast_block_inverse(&k, 2).unwrap();
        assert!((inv.get(0, 0) - 0.5).abs() < 1e-12);
        assert!((inv.get(2, 2) - 0.25).abs() < 1e-12);
        assert!(broadcast_block_inverse(&k, 0).is_err());
    }
}
