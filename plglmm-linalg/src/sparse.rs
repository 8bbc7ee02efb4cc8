#![allow(clippy::needless_range_loop)]
//! Sparse matrix storage backed by sprs.
//!
//! Kinship matrices arrive from disk in coordinate form and are mostly
//! zero between unrelated samples. They stay sparse while being aligned
//! to the model's sample order and are densified only when the fit
//! starts.

use sprs::{CsMat, CsMatI, TriMat};

use crate::dense::DenseMatrix;

/// A sparse matrix wrapper around sprs CSR format.
#[derive(Debug, Clone)]
pub struct SparseMatrix {
    inner: CsMatI<f64, usize>,
}

impl SparseMatrix {
    /// Create a sparse matrix from COO triplets. Duplicate entries are summed.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        rows: &[usize],
        cols: &[usize],
        vals: &[f64],
    ) -> Self {
        assert_eq!(rows.len(), cols.len());
        assert_eq!(rows.len(), vals.len());
        let mut tri = TriMat::new((nrows, ncols));
        for i in 0..rows.len() {
            tri.add_triplet(rows[i], cols[i], vals[i]);
        }
        Self { inner: tri.to_csr() }
    }

    /// Create a sparse identity matrix.
    pub fn identity(n: usize) -> Self {
        Self {
            inner: CsMat::eye(n),
        }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.inner.rows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.inner.cols()
    }

    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    /// Get element at (row, col). Returns 0.0 if not stored.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner.get(row, col).copied().unwrap_or(0.0)
    }

    /// Stored entries as (row, col, value), row-major.
    pub fn triplets(&self) -> Vec<(usize, usize, f64)> {
        self.inner.iter().map(|(&v, (i, j))| (i, j, v)).collect()
    }

    /// Sparse matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(v.len(), self.ncols());
        let mut result = vec![0.0; self.nrows()];
        for (&val, (i, j)) in self.inner.iter() {
            result[i] += val * v[j];
        }
        result
    }

    /// Symmetric sub-selection: entry (a, b) of the result is entry
    /// (`index[a]`, `index[b]`) of self.
    pub fn select(&self, index: &[usize]) -> SparseMatrix {
        let n = self.nrows();
        let mut position = vec![None; n];
        for (new, &old) in index.iter().enumerate() {
            assert!(old < n, "index {} out of range for {} rows", old, n);
            position[old] = Some(new);
        }
        let mut tri = TriMat::new((index.len(), index.len()));
        for (&val, (i, j)) in self.inner.iter() {
            if let (Some(a), Some(b)) = (position[i], position.get(j).copied().flatten()) {
                tri.add_triplet(a, b, val);
            }
        }
        Self { inner: tri.to_csr() }
    }

    /// Densify.
    pub fn to_dense(&self) -> DenseMatrix {
        let mut m = DenseMatrix::zeros(self.nrows(), self.ncols());
        for (&val, (i, j)) in self.inner.iter() {
            m.set(i, j, val);
        }
        m
    }

    /// Extract the diagonal entries.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.get(i, i)).collect()
    }

    /// True if square and every stored entry matches its mirror within `tol`.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        self.nrows() == self.ncols()
            && self
                .inner
                .iter()
                .all(|(&v, (i, j))| (v - self.get(j, i)).abs() <= tol)
    }
}
