#![allow(clippy::needless_range_loop)]
//! Dense matrix operations backed by faer.
//!
//! Wraps faer's column-major `Mat<f64>` with the operations the
//! pseudo-likelihood GLMM leans on: products, block extraction and
//! assembly, traces of products, and element-wise arithmetic.

use faer::Mat;
use serde::{Deserialize, Serialize};

/// A dense matrix wrapper around faer's `Mat<f64>`.
///
/// Serialized as its dimensions plus column-major data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "DenseMatrixData", try_from = "DenseMatrixData")]
pub struct DenseMatrix {
    inner: Mat<f64>,
}

/// Flat serialized form of a [`DenseMatrix`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseMatrixData {
    nrows: usize,
    ncols: usize,
    data: Vec<f64>,
}

impl From<DenseMatrix> for DenseMatrixData {
    fn from(m: DenseMatrix) -> Self {
        Self {
            nrows: m.nrows(),
            ncols: m.ncols(),
            data: m.to_col_major(),
        }
    }
}

impl TryFrom<DenseMatrixData> for DenseMatrix {
    type Error = String;

    fn try_from(d: DenseMatrixData) -> Result<Self, Self::Error> {
        if d.data.len() != d.nrows * d.ncols {
            return Err(format!(
                "matrix data has {} entries, expected {} x {} = {}",
                d.data.len(),
                d.nrows,
                d.ncols,
                d.nrows * d.ncols
            ));
        }
        Ok(DenseMatrix::from_col_major(d.nrows, d.ncols, d.data))
    }
}

impl DenseMatrix {
    /// Create a new dense matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            inner: Mat::zeros(nrows, ncols),
        }
    }

    /// Create a new dense matrix filled with a constant value.
    pub fn full(nrows: usize, ncols: usize, value: f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, |_, _| value),
        }
    }

    /// Create a dense matrix from a flat vec (column-major order).
    pub fn from_col_major(nrows: usize, ncols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i]);
        Self { inner }
    }

    /// Create a dense matrix from row-major input.
    pub fn from_row_major(nrows: usize, ncols: usize, data: &[f64]) -> Self {
        assert_eq!(data.len(), nrows * ncols);
        let inner = Mat::from_fn(nrows, ncols, |i, j| data[i * ncols + j]);
        Self { inner }
    }

    /// Build a matrix entry by entry.
    pub fn from_fn(nrows: usize, ncols: usize, f: impl FnMut(usize, usize) -> f64) -> Self {
        Self {
            inner: Mat::from_fn(nrows, ncols, f),
        }
    }

    /// Create an identity matrix of size n x n.
    pub fn identity(n: usize) -> Self {
        Self {
            inner: Mat::identity(n, n),
        }
    }

    /// Create a diagonal matrix from a vector.
    pub fn from_diag(diag: &[f64]) -> Self {
        let n = diag.len();
        let inner = Mat::from_fn(n, n, |i, j| if i == j { diag[i] } else { 0.0 });
        Self { inner }
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.inner.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.inner.ncols()
    }

    pub fn is_square(&self) -> bool {
        self.nrows() == self.ncols()
    }

    /// Get element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.inner[(row, col)]
    }

    /// Set element at (row, col).
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.inner[(row, col)] = value;
    }

    /// Get a reference to the underlying faer matrix.
    pub fn as_faer(&self) -> &Mat<f64> {
        &self.inner
    }

    /// Create from a faer matrix.
    pub fn from_faer(mat: Mat<f64>) -> Self {
        Self { inner: mat }
    }

    /// Matrix-vector product: self * v.
    pub fn mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.ncols(), v.len());
        let n = self.nrows();
        let mut result = vec![0.0; n];
        for j in 0..self.ncols() {
            let vj = v[j];
            if vj == 0.0 {
                continue;
            }
            let col = self.inner.col(j);
            for i in 0..n {
                result[i] += col[i] * vj;
            }
        }
        result
    }

    /// Transposed matrix-vector product: self' * v.
    pub fn t_mat_vec(&self, v: &[f64]) -> Vec<f64> {
        assert_eq!(self.nrows(), v.len());
        (0..self.ncols())
            .map(|j| {
                let col = self.inner.col(j);
                (0..self.nrows()).map(|i| col[i] * v[i]).sum()
            })
            .collect()
    }

    /// Matrix-matrix product: self * other.
    pub fn mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.nrows());
        DenseMatrix {
            inner: &self.inner * &other.inner,
        }
    }

    /// Transposed product: self' * other, without materializing self'.
    pub fn t_mat_mul(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        DenseMatrix {
            inner: self.inner.transpose() * &other.inner,
        }
    }

    /// Product with the transpose of `other`: self * other'.
    pub fn mat_mul_t(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.ncols(), other.ncols());
        DenseMatrix {
            inner: &self.inner * other.inner.transpose(),
        }
    }

    /// Scale row i by d[i], i.e. diag(d) * self.
    pub fn scale_rows(&self, d: &[f64]) -> DenseMatrix {
        assert_eq!(d.len(), self.nrows());
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| d[i] * self.inner[(i, j)]);
        DenseMatrix { inner }
    }

    /// Transpose.
    pub fn transpose(&self) -> DenseMatrix {
        DenseMatrix {
            inner: self.inner.transpose().to_owned(),
        }
    }

    /// Extract column as a Vec<f64>.
    pub fn col(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.inner[(i, j)]).collect()
    }

    /// Extract row as a Vec<f64>.
    pub fn row(&self, i: usize) -> Vec<f64> {
        (0..self.ncols()).map(|j| self.inner[(i, j)]).collect()
    }

    /// Set an entire row from a slice.
    pub fn set_row(&mut self, i: usize, data: &[f64]) {
        assert_eq!(data.len(), self.ncols());
        for j in 0..self.ncols() {
            self.inner[(i, j)] = data[j];
        }
    }

    /// Copy out the `nrows x ncols` block starting at (row, col).
    pub fn block(&self, row: usize, col: usize, nrows: usize, ncols: usize) -> DenseMatrix {
        assert!(row + nrows <= self.nrows() && col + ncols <= self.ncols());
        DenseMatrix {
            inner: self.inner.submatrix(row, col, nrows, ncols).to_owned(),
        }
    }

    /// Write `block` into self with its top-left corner at (row, col).
    pub fn set_block(&mut self, row: usize, col: usize, block: &DenseMatrix) {
        assert!(row + block.nrows() <= self.nrows() && col + block.ncols() <= self.ncols());
        for j in 0..block.ncols() {
            for i in 0..block.nrows() {
                self.inner[(row + i, col + j)] = block.inner[(i, j)];
            }
        }
    }

    /// Gather the listed columns, in order, into a new matrix.
    pub fn select_columns(&self, cols: &[usize]) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), cols.len(), |i, j| self.inner[(i, cols[j])]);
        DenseMatrix { inner }
    }

    /// Stack `[ul ur; ll lr]` into one matrix.
    pub fn from_blocks(
        ul: &DenseMatrix,
        ur: &DenseMatrix,
        ll: &DenseMatrix,
        lr: &DenseMatrix,
    ) -> DenseMatrix {
        assert_eq!(ul.nrows(), ur.nrows());
        assert_eq!(ll.nrows(), lr.nrows());
        assert_eq!(ul.ncols(), ll.ncols());
        assert_eq!(ur.ncols(), lr.ncols());
        let (m, s) = (ul.nrows(), ll.nrows());
        let (p, q) = (ul.ncols(), ur.ncols());
        let mut out = DenseMatrix::zeros(m + s, p + q);
        out.set_block(0, 0, ul);
        out.set_block(0, p, ur);
        out.set_block(m, 0, ll);
        out.set_block(m, p, lr);
        out
    }

    /// Element-wise addition: self + other.
    pub fn add(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        DenseMatrix {
            inner: &self.inner + &other.inner,
        }
    }

    /// Element-wise subtraction: self - other.
    pub fn sub(&self, other: &DenseMatrix) -> DenseMatrix {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        DenseMatrix {
            inner: &self.inner - &other.inner,
        }
    }

    /// Add `d` to the diagonal in place.
    pub fn add_diag(&mut self, d: &[f64]) {
        assert_eq!(d.len(), self.nrows().min(self.ncols()));
        for i in 0..d.len() {
            self.inner[(i, i)] += d[i];
        }
    }

    /// Scalar multiplication.
    pub fn scale(&self, s: f64) -> DenseMatrix {
        let inner = Mat::from_fn(self.nrows(), self.ncols(), |i, j| self.inner[(i, j)] * s);
        DenseMatrix { inner }
    }

    /// Diagonal of a matrix.
    pub fn diag(&self) -> Vec<f64> {
        let n = self.nrows().min(self.ncols());
        (0..n).map(|i| self.inner[(i, i)]).collect()
    }

    /// Trace of a square matrix.
    pub fn trace(&self) -> f64 {
        assert!(self.is_square());
        self.diag().iter().sum()
    }

    /// tr(self * other) without forming the product.
    pub fn trace_of_product(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.ncols(), other.nrows());
        assert_eq!(self.nrows(), other.ncols());
        let mut tr = 0.0;
        for i in 0..self.nrows() {
            for k in 0..self.ncols() {
                tr += self.inner[(i, k)] * other.inner[(k, i)];
            }
        }
        tr
    }

    /// Frobenius inner product: sum_ij self_ij * other_ij.
    pub fn frobenius_inner(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let mut s = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                s += self.inner[(i, j)] * other.inner[(i, j)];
            }
        }
        s
    }

    /// Sum of all entries.
    pub fn sum(&self) -> f64 {
        let mut s = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                s += self.inner[(i, j)];
            }
        }
        s
    }

    /// Quadratic form a' * self * b.
    pub fn quad_form(&self, a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), self.nrows());
        DenseMatrix::dot(a, &self.mat_vec(b))
    }

    /// Largest absolute element-wise difference to `other`.
    pub fn max_abs_diff(&self, other: &DenseMatrix) -> f64 {
        assert_eq!(self.nrows(), other.nrows());
        assert_eq!(self.ncols(), other.ncols());
        let mut d: f64 = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                d = d.max((self.inner[(i, j)] - other.inner[(i, j)]).abs());
            }
        }
        d
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> f64 {
        let mut d: f64 = 0.0;
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                d = d.max(self.inner[(i, j)].abs());
            }
        }
        d
    }

    /// True if every entry is finite.
    pub fn is_finite(&self) -> bool {
        (0..self.ncols()).all(|j| (0..self.nrows()).all(|i| self.inner[(i, j)].is_finite()))
    }

    /// True if square and symmetric to within `tol`.
    pub fn is_symmetric(&self, tol: f64) -> bool {
        if !self.is_square() {
            return false;
        }
        let n = self.nrows();
        for j in 0..n {
            for i in (j + 1)..n {
                if (self.inner[(i, j)] - self.inner[(j, i)]).abs() > tol {
                    return false;
                }
            }
        }
        true
    }

    /// Dot product of two vectors.
    pub fn dot(a: &[f64], b: &[f64]) -> f64 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    /// Compute X' * diag(w) * X for design matrix X and weight vector w.
    pub fn xtwx(&self, w: &[f64]) -> DenseMatrix {
        let n = self.nrows();
        let p = self.ncols();
        assert_eq!(w.len(), n);
        let mut result = DenseMatrix::zeros(p, p);
        for j in 0..p {
            for k in j..p {
                let mut s = 0.0;
                for i in 0..n {
                    s += self.inner[(i, j)] * w[i] * self.inner[(i, k)];
                }
                result.set(j, k, s);
                if j != k {
                    result.set(k, j, s);
                }
            }
        }
        result
    }

    /// Compute X' * diag(w) * v for design matrix X, weights w and vector v.
    pub fn xtwv(&self, w: &[f64], v: &[f64]) -> Vec<f64> {
        let n = self.nrows();
        assert_eq!(w.len(), n);
        assert_eq!(v.len(), n);
        let wv: Vec<f64> = w.iter().zip(v.iter()).map(|(a, b)| a * b).collect();
        self.t_mat_vec(&wv)
    }

    /// Extract data as a flat Vec in column-major order.
    pub fn to_col_major(&self) -> Vec<f64> {
        let mut data = Vec::with_capacity(self.nrows() * self.ncols());
        for j in 0..self.ncols() {
            for i in 0..self.nrows() {
                data.push(self.inner[(i, j)]);
            }
        }
        data
    }
}

impl std::fmt::Display for DenseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for i in 0..self.nrows() {
            for j in 0..self.ncols() {
                if j > 0 {
                    write!(f, "\t")?;
                }
                write!(f, "{:.6}", self.inner[(i, j)])?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
