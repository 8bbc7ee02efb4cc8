//! plglmm-core: Pseudo-likelihood GLMM engine
//!
//! Fits count-data GLMMs with a known kinship covariance: the iterative
//! pseudo-likelihood driver, variance-component estimators, post-fit
//! inference, and fitted-model persistence.

pub mod error;
pub mod glmm;
pub mod model;
pub mod util;

pub use error::GlmmError;
