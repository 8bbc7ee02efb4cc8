//! Variance-component solver selection and switching.
//!
//! The active solver can only move in one direction: once an update
//! produces a negative component the fit switches to the constrained
//! Haseman-Elston estimator for the rest of the run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Solver requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverKind {
    Fisher,
    HasemanElston,
    ConstrainedHasemanElston,
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Fisher
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SolverKind::Fisher => "Fisher",
            SolverKind::HasemanElston => "HE",
            SolverKind::ConstrainedHasemanElston => "HE-NNLS",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for SolverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Fisher" | "fisher" => Ok(SolverKind::Fisher),
            "HE" | "he" => Ok(SolverKind::HasemanElston),
            "HE-NNLS" | "he-nnls" => Ok(SolverKind::ConstrainedHasemanElston),
            other => Err(format!(
                "unknown solver '{}' (expected Fisher, HE or HE-NNLS)",
                other
            )),
        }
    }
}

/// Solver state carried across iterations.
///
/// The constrained variant threads its regression intercept from one
/// iteration to the next; it is not part of `sigma`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum VarianceSolver {
    Fisher,
    HasemanElston,
    ConstrainedHasemanElston { intercept: f64 },
}

impl VarianceSolver {
    pub fn from_kind(kind: SolverKind) -> Self {
        match kind {
            SolverKind::Fisher => VarianceSolver::Fisher,
            SolverKind::HasemanElston => VarianceSolver::HasemanElston,
            SolverKind::ConstrainedHasemanElston => {
                VarianceSolver::ConstrainedHasemanElston { intercept: 0.0 }
            }
        }
    }

    pub fn kind(&self) -> SolverKind {
        match self {
            VarianceSolver::Fisher => SolverKind::Fisher,
            VarianceSolver::HasemanElston => SolverKind::HasemanElston,
            VarianceSolver::ConstrainedHasemanElston { .. } => SolverKind::ConstrainedHasemanElston,
        }
    }

    pub fn is_constrained(&self) -> bool {
        matches!(self, VarianceSolver::ConstrainedHasemanElston { .. })
    }

    /// Intercept carried by the constrained solver, 0 otherwise.
    pub fn intercept(&self) -> f64 {
        match self {
            VarianceSolver::ConstrainedHasemanElston { intercept } => *intercept,
            _ => 0.0,
        }
    }

    /// Warm start for the constrained estimator: `[intercept, sigma..]`
    /// after the first iteration, none before it.
    pub fn constrained_start(&self, sigma: &[f64], iteration: usize) -> Option<Vec<f64>> {
        if iteration == 0 {
            return None;
        }
        let mut start = Vec::with_capacity(sigma.len() + 1);
        start.push(self.intercept());
        start.extend_from_slice(sigma);
        Some(start)
    }
}

/// Solver for the next iteration given this iteration's raw update.
///
/// Any negative entry moves to the constrained solver; the constrained
/// solver never leaves.
pub fn transition(solver: VarianceSolver, sigma_update: &[f64]) -> VarianceSolver {
    match solver {
        VarianceSolver::ConstrainedHasemanElston { .. } => solver,
        _ if sigma_update.iter().any(|&s| s < 0.0) => {
            VarianceSolver::ConstrainedHasemanElston {
                intercept: solver.intercept(),
            }
        }
        _ => solver,
    }
}
