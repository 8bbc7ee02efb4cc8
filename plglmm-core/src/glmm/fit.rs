//! Pseudo-likelihood GLMM fit with a known kinship covariance.
//!
//! Model: log E[y] = offset + X beta + Z u, u ~ N(0, G), where G is
//! block-diagonal with `sigma_i * I` per ordinary grouping and
//! `sigma_c * K` for the kinship grouping.
//!
//! Each iteration linearizes the model around the current means, inverts
//! the pseudo-variance, updates the variance components with the active
//! solver and then solves the mixed model equations for `beta` and `u`.
//! A variance component estimated at zero pins its random effects at
//! zero for that iteration.

use plglmm_linalg::DenseMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::covariance::{broadcast_g, broadcast_g_inv, invert_kinship, Groupings};
use super::family::VarianceFamily;
use super::haseman_elston::{haseman_elston, haseman_elston_constrained};
use super::inference::{standard_errors, t_scores, variance_covariance};
use super::matrices::{
    fitted_means, invert_diag, mean_variance, reml_projection, weight_diag, working_response,
};
use super::mme::{coefficient_matrix, scatter_theta, solve_mme, split_theta, ActiveEffects};
use super::partials::{project_partials, pseudovar_partials};
use super::pseudo_var::invert_pseudo_var;
use super::solver::{transition, SolverKind, VarianceSolver};
use super::variance_components::{
    fisher_score, pl_score_information, reml_score_information, ScoreInformation,
};
use crate::error::{ensure_len, GlmmError, Result};
use crate::util::math::{abs_diff, all_below, all_finite, any_infinite, any_nan, max_entry};

/// Configuration for the fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    /// Convergence tolerance on every |theta| and |sigma| change.
    pub tol: f64,
    /// The fit stops once the iteration count exceeds this.
    pub max_iter: usize,
    /// Use REML score and information for the variance components.
    pub reml: bool,
    /// Initial variance-component solver.
    pub solver: SolverKind,
    /// Variance form of the counts.
    pub family: VarianceFamily,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            tol: 1e-6,
            max_iter: 50,
            reml: false,
            solver: SolverKind::Fisher,
            family: VarianceFamily::Poisson,
        }
    }
}

/// Design, kinship, response and offsets for one fit.
#[derive(Debug, Clone)]
pub struct GlmmData {
    /// Fixed-effect design (n x m).
    pub x: DenseMatrix,
    /// Random-effect design (n x s).
    pub z: DenseMatrix,
    /// Known covariance among the kinship grouping's levels.
    pub k: DenseMatrix,
    /// Observed counts.
    pub y: Vec<f64>,
    pub offsets: Vec<f64>,
    pub groupings: Groupings,
}

impl GlmmData {
    /// Bundle the inputs, checking every dimension and the groupings.
    pub fn new(
        x: DenseMatrix,
        z: DenseMatrix,
        k: DenseMatrix,
        y: Vec<f64>,
        offsets: Vec<f64>,
        groupings: Groupings,
    ) -> Result<Self> {
        let n = x.nrows();
        ensure_len("Z rows", n, z.nrows())?;
        ensure_len("response", n, y.len())?;
        ensure_len("offsets", n, offsets.len())?;
        ensure_len("kinship columns", k.nrows(), k.ncols())?;
        groupings.validate(z.ncols(), k.nrows())?;
        if !x.is_finite() {
            return Err(GlmmError::NonFiniteInput("fixed-effect design"));
        }
        if !z.is_finite() {
            return Err(GlmmError::NonFiniteInput("random-effect design"));
        }
        if !all_finite(&y) {
            return Err(GlmmError::NonFiniteInput("response"));
        }
        if !all_finite(&offsets) {
            return Err(GlmmError::NonFiniteInput("offsets"));
        }
        Ok(Self {
            x,
            z,
            k,
            y,
            offsets,
            groupings,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_fixed(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_random(&self) -> usize {
        self.z.ncols()
    }

    pub fn n_components(&self) -> usize {
        self.groupings.len()
    }
}

/// Caller-supplied starting point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialEstimates {
    pub beta: Vec<f64>,
    pub u: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Fitted means matching the starting effects.
    pub mu: Vec<f64>,
    pub dispersion: f64,
    /// Initial broadcast covariance; built from `sigma` when absent.
    pub g: Option<DenseMatrix>,
}

/// Outcome of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitStatus {
    Iterating,
    Converged,
    /// NaN in the fixed/random-effect update.
    Diverged,
    /// Infinite fitted mean.
    DivergedInf,
    MaxIterReached,
}

impl FitStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FitStatus::Iterating)
    }

    pub fn is_diverged(&self) -> bool {
        matches!(self, FitStatus::Diverged | FitStatus::DivergedInf)
    }
}

/// Per-iteration diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    /// 1-indexed iteration this record belongs to.
    pub iteration: usize,
    pub theta_diff: Vec<f64>,
    pub sigma_diff: Vec<f64>,
    pub beta: Vec<f64>,
    pub u: Vec<f64>,
    pub sigma: Vec<f64>,
    /// Solver that produced `sigma`.
    pub solver: SolverKind,
}

/// Random-effect predictions for one grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomEffect {
    pub name: String,
    pub levels: Vec<String>,
    pub values: Vec<f64>,
}

/// Everything a fit produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmmFit {
    pub status: FitStatus,
    pub converged: bool,
    pub iterations: usize,
    pub beta: Vec<f64>,
    /// Stacked random effects in `Z` column order.
    pub u: Vec<f64>,
    pub random_effects: Vec<RandomEffect>,
    pub sigma: Vec<f64>,
    pub dispersion: f64,
    pub mu: Vec<f64>,
    /// Solver active when the fit stopped.
    pub solver: VarianceSolver,
    pub score: Vec<f64>,
    /// Expected information of the variance components.
    pub information: DenseMatrix,
    pub standard_errors: Vec<f64>,
    pub t_scores: Vec<f64>,
    /// Mixed model coefficient matrix over `beta` and the random effects
    /// listed in `active_columns`.
    pub coefficient_matrix: DenseMatrix,
    /// Columns of `Z` with a positive variance component in the final
    /// iteration.
    pub active_columns: Vec<usize>,
    /// REML projection `P`.
    pub projection: DenseMatrix,
    /// Projected partials `P dV_i` (REML) or `V*^-1 dV_i`.
    pub partials: Vec<DenseMatrix>,
    /// Pseudo-inverse of the broadcast `G`: zero blocks for zero
    /// components.
    pub g_inv: DenseMatrix,
    pub v_star_inv: DenseMatrix,
    /// Diagonal of `W^-1`.
    pub winv: Vec<f64>,
    /// Approximate covariance of the variance-component estimates.
    pub vcov: DenseMatrix,
    pub trace: Vec<ConvergenceRecord>,
}

impl GlmmFit {
    /// The fit's final parameters as a new starting point.
    pub fn restart_estimates(&self) -> InitialEstimates {
        InitialEstimates {
            beta: self.beta.clone(),
            u: self.u.clone(),
            sigma: self.sigma.clone(),
            mu: self.mu.clone(),
            dispersion: self.dispersion,
            g: None,
        }
    }
}

/// Parameter state owned by the driver and updated in place.
#[derive(Debug, Clone)]
pub struct FitState {
    pub beta: Vec<f64>,
    pub u: Vec<f64>,
    pub theta: Vec<f64>,
    pub sigma: Vec<f64>,
    pub g: DenseMatrix,
    pub g_inv: DenseMatrix,
    pub disp: f64,
    pub mu: Vec<f64>,
    pub solver: VarianceSolver,
    /// Completed iterations.
    pub iteration: usize,
    pub theta_diff: Vec<f64>,
    pub sigma_diff: Vec<f64>,
}

impl FitState {
    fn new(
        data: &GlmmData,
        init: &InitialEstimates,
        k_inv: &DenseMatrix,
        solver: SolverKind,
    ) -> Result<Self> {
        let (n, m, s, c) = (
            data.n_obs(),
            data.n_fixed(),
            data.n_random(),
            data.n_components(),
        );
        ensure_len("initial beta", m, init.beta.len())?;
        ensure_len("initial u", s, init.u.len())?;
        ensure_len("initial sigma", c, init.sigma.len())?;
        ensure_len("initial mu", n, init.mu.len())?;
        if !all_finite(&init.mu) {
            return Err(GlmmError::NonFiniteInput("initial mu"));
        }
        let g = match &init.g {
            Some(g) => {
                ensure_len("initial G rows", s, g.nrows())?;
                ensure_len("initial G columns", s, g.ncols())?;
                g.clone()
            }
            None => broadcast_g(&data.groupings, &init.sigma, &data.k)?,
        };
        let g_inv = broadcast_g_inv(&data.groupings, &init.sigma, k_inv)?;
        let mut theta = init.beta.clone();
        theta.extend_from_slice(&init.u);

        Ok(Self {
            beta: init.beta.clone(),
            u: init.u.clone(),
            theta,
            sigma: init.sigma.clone(),
            g,
            g_inv,
            disp: init.dispersion,
            mu: init.mu.clone(),
            solver: VarianceSolver::from_kind(solver),
            iteration: 0,
            theta_diff: vec![0.0; m + s],
            sigma_diff: vec![0.0; c],
        })
    }

    fn record(&self, iteration: usize) -> ConvergenceRecord {
        ConvergenceRecord {
            iteration,
            theta_diff: self.theta_diff.clone(),
            sigma_diff: self.sigma_diff.clone(),
            beta: self.beta.clone(),
            u: self.u.clone(),
            sigma: self.sigma.clone(),
            solver: self.solver.kind(),
        }
    }
}

/// Working quantities of one linearization. Rebuilt every iteration.
struct Linearization {
    ystar: Vec<f64>,
    winv: Vec<f64>,
    v_star_inv: DenseMatrix,
    projection: DenseMatrix,
    partials: Vec<DenseMatrix>,
    score_info: ScoreInformation,
}

/// Steps 1-4 of an iteration: working response, weights, inverse
/// pseudo-variance, projection and the score/information pair.
fn linearize(
    data: &GlmmData,
    state: &mut FitState,
    partials: &[DenseMatrix],
    config: &FitConfig,
) -> Result<Linearization> {
    let ystar = working_response(&data.x, &data.z, &state.beta, &state.u, &data.y, &state.mu)?;

    // Dispersion is not estimated inside the loop.
    state.disp = 1.0;

    let vmu = mean_variance(&state.mu, state.disp, config.family);
    let w = weight_diag(&state.mu, &vmu);
    let winv = invert_diag(&w);

    let a = DenseMatrix::from_diag(&winv);
    let zta = data.z.scale_rows(&winv).transpose();
    let v_star_inv = invert_pseudo_var(&a, &state.g, &data.z, &zta)?;

    let projection = reml_projection(&v_star_inv, &data.x)?;
    let (projected, score_info) = if config.reml {
        let vp = project_partials(partials, &projection);
        let si = reml_score_information(&vp, &ystar, &projection)?;
        (vp, si)
    } else {
        let vp = project_partials(partials, &v_star_inv);
        let si = pl_score_information(&vp, &ystar, &data.x, &state.beta, &v_star_inv)?;
        (vp, si)
    };

    Ok(Linearization {
        ystar,
        winv,
        v_star_inv,
        projection,
        partials: projected,
        score_info,
    })
}

/// Run the given solver once. The constrained solver's intercept is
/// stripped from the estimate and carried in the returned solver.
fn estimate_sigma(
    solver: VarianceSolver,
    state: &FitState,
    lin: &Linearization,
    partials: &[DenseMatrix],
) -> Result<(Vec<f64>, VarianceSolver)> {
    match solver {
        VarianceSolver::Fisher => {
            let update = fisher_score(
                &lin.score_info.information,
                &lin.score_info.score,
                &state.sigma,
            )?;
            Ok((update, solver))
        }
        VarianceSolver::HasemanElston => {
            let update = haseman_elston(&lin.projection, partials, &lin.ystar)?;
            Ok((update, solver))
        }
        VarianceSolver::ConstrainedHasemanElston { .. } => {
            let start = solver.constrained_start(&state.sigma, state.iteration);
            let est =
                haseman_elston_constrained(&lin.projection, partials, &lin.ystar, start.as_deref())?;
            let intercept = est[0];
            Ok((
                est[1..].to_vec(),
                VarianceSolver::ConstrainedHasemanElston { intercept },
            ))
        }
    }
}

/// Steps 5-6: new variance components, switching to the constrained
/// solver (once, for this and every later iteration) on any negative
/// estimate. Rebuilds `G` and `G^-1`.
fn update_variance_components(
    data: &GlmmData,
    state: &mut FitState,
    lin: &Linearization,
    partials: &[DenseMatrix],
    k_inv: &DenseMatrix,
) -> Result<()> {
    let (mut update, mut solver) = estimate_sigma(state.solver, state, lin, partials)?;
    let next = transition(solver, &update);
    if next.is_constrained() && !solver.is_constrained() {
        warn!(
            "Negative variance components {:?} from {} - re-running with HE-NNLS",
            update,
            solver.kind()
        );
        (update, solver) = estimate_sigma(next, state, lin, partials)?;
    }
    state.solver = solver;

    state.sigma_diff = abs_diff(&update, &state.sigma);
    state.sigma = update;
    state.g = broadcast_g(&data.groupings, &state.sigma, &data.k)?;
    state.g_inv = broadcast_g_inv(&data.groupings, &state.sigma, k_inv)?;
    Ok(())
}

/// Fit the model from the given starting point.
///
/// Structural problems (dimensions, groupings, singular information or
/// coefficient matrices) are returned as errors. Divergence and an
/// exhausted iteration budget are reported through `FitStatus`.
pub fn fit_glmm(
    data: &GlmmData,
    init: &InitialEstimates,
    config: &FitConfig,
) -> Result<GlmmFit> {
    let (m, s) = (data.n_fixed(), data.n_random());
    info!(
        "Starting PL-GLMM fit with n={}, m={}, s={}, c={} (solver {}, REML {})",
        data.n_obs(),
        m,
        s,
        data.n_components(),
        config.solver,
        config.reml
    );

    // Inverted once and shared by every iteration
    let k_inv = invert_kinship(&data.k)?.inverse;
    let partials = pseudovar_partials(&data.z, &data.k, &data.groupings)?;
    let mut state = FitState::new(data, init, &k_inv, config.solver)?;

    let mut status = FitStatus::Iterating;
    let mut trace: Vec<ConvergenceRecord> = Vec::new();

    let (lin, coeff, active) = loop {
        let lin = linearize(data, &mut state, &partials, config)?;
        update_variance_components(data, &mut state, &lin, &partials, &k_inv)?;

        let columns = data.groupings.active_columns(&state.sigma);
        if columns.len() < s {
            debug!(
                "Pinning {} random effects of zero variance components at 0",
                s - columns.len()
            );
        }
        let active = ActiveEffects::select(&data.z, &state.g_inv, columns)?;
        let coeff = coefficient_matrix(&data.x, &lin.winv, &active.z, &active.g_inv)?;
        let solution = solve_mme(&coeff, &data.x, &active.z, &lin.winv, &lin.ystar)?;
        let theta_new = scatter_theta(&solution, m, &active.columns, s)?;

        if any_nan(&theta_new) {
            warn!(
                "NaN in parameter update at iteration {} - algorithm is diverging",
                state.iteration + 1
            );
            trace.push(state.record(state.iteration + 1));
            status = FitStatus::Diverged;
            break (lin, coeff, active);
        }

        state.theta_diff = abs_diff(&theta_new, &state.theta);
        let (beta, u) = split_theta(&theta_new, m)?;
        state.theta = theta_new;
        state.beta = beta;
        state.u = u;
        state.mu = fitted_means(&data.x, &data.z, &state.beta, &state.u, &data.offsets)?;

        if any_infinite(&state.mu) {
            warn!(
                "Infinite fitted means at iteration {} - algorithm is diverging",
                state.iteration + 1
            );
            trace.push(state.record(state.iteration + 1));
            status = FitStatus::DivergedInf;
            break (lin, coeff, active);
        }

        state.iteration += 1;
        debug!(
            "Iteration {}: max |theta diff| = {:.3e}, max |sigma diff| = {:.3e}, sigma = {:?}, solver {}",
            state.iteration,
            max_entry(&state.theta_diff),
            max_entry(&state.sigma_diff),
            state.sigma,
            state.solver.kind()
        );

        if all_below(&state.theta_diff, config.tol) && all_below(&state.sigma_diff, config.tol) {
            status = FitStatus::Converged;
        } else if state.iteration > config.max_iter {
            warn!(
                "Iteration budget of {} exhausted before convergence",
                config.max_iter
            );
            status = FitStatus::MaxIterReached;
        }
        trace.push(state.record(state.iteration));
        if status.is_terminal() {
            break (lin, coeff, active);
        }
    };

    let se = match standard_errors(&coeff, m) {
        Ok(se) => se,
        Err(e) if status.is_diverged() => {
            warn!("Standard errors unavailable for a diverged fit: {}", e);
            vec![f64::NAN; m]
        }
        Err(e) => return Err(e),
    };
    let t = t_scores(&state.beta, &se)?;
    let vcov = variance_covariance(&lin.partials);

    info!(
        "PL-GLMM fit finished: {:?} after {} iterations, sigma = {:?}",
        status, state.iteration, state.sigma
    );

    let random_effects = data
        .groupings
        .split(&state.u)
        .into_iter()
        .enumerate()
        .map(|(i, values)| RandomEffect {
            name: data.groupings.names[i].clone(),
            levels: data.groupings.levels[i].clone(),
            values,
        })
        .collect();

    Ok(GlmmFit {
        status,
        converged: status == FitStatus::Converged,
        iterations: state.iteration,
        random_effects,
        beta: state.beta,
        u: state.u,
        sigma: state.sigma,
        dispersion: state.disp,
        mu: state.mu,
        solver: state.solver,
        score: lin.score_info.score,
        information: lin.score_info.information,
        standard_errors: se,
        t_scores: t,
        coefficient_matrix: coeff,
        active_columns: active.columns,
        projection: lin.projection,
        partials: lin.partials,
        g_inv: state.g_inv,
        v_star_inv: lin.v_star_inv,
        winv: lin.winv,
        vcov,
        trace,
    })
}
