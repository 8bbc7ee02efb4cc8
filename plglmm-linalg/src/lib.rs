//! plglmm-linalg: Linear algebra wrappers for plglmm
//!
//! Provides dense and sparse matrix types, inversion with condition
//! number checks, pseudo-inverses, and the non-negative least squares
//! solver used by the constrained variance-component estimator.

pub mod decomposition;
pub mod dense;
pub mod nnls;
pub mod sparse;

pub use decomposition::LinalgError;
pub use dense::DenseMatrix;
pub use sparse::SparseMatrix;
