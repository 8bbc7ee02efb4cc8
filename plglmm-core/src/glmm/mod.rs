//! Pseudo-likelihood GLMM estimation.
//!
//! - Model matrices of the log-link linearization
//! - Woodbury inversion of the pseudo-variance
//! - Variance-component estimation (Fisher scoring, Haseman-Elston, NNLS)
//! - Mixed model equations and post-fit inference
//! - The convergence-controlled driver

pub mod covariance;
pub mod family;
pub mod fit;
pub mod haseman_elston;
pub mod inference;
pub mod initial;
pub mod matrices;
pub mod mme;
pub mod partials;
pub mod pseudo_var;
pub mod solver;
pub mod variance_components;

pub use covariance::Groupings;
pub use family::VarianceFamily;
pub use fit::{
    fit_glmm, ConvergenceRecord, FitConfig, FitStatus, GlmmData, GlmmFit, InitialEstimates,
    RandomEffect,
};
pub use solver::{SolverKind, VarianceSolver};
