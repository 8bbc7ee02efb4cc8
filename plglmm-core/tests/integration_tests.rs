//! Integration tests for the pseudo-likelihood GLMM driver.
//!
//! The reference design has ten observations, an intercept, a two-level
//! batch effect and one kinship level per observation with `K = I`.
//! Expected values come from an independent dense implementation of the
//! same iteration.

use plglmm_core::glmm::covariance::Groupings;
use plglmm_core::glmm::fit::{fit_glmm, FitConfig, FitStatus, GlmmData, GlmmFit, InitialEstimates};
use plglmm_core::glmm::{SolverKind, VarianceFamily};
use plglmm_core::GlmmError;
use plglmm_linalg::DenseMatrix;

const OVERDISPERSED: [f64; 10] = [2.0, 12.0, 1.0, 15.0, 3.0, 9.0, 0.0, 20.0, 4.0, 11.0];
const MILD: [f64; 10] = [3.0, 7.0, 2.0, 9.0, 4.0, 5.0, 1.0, 8.0, 6.0, 5.0];
const UNDERDISPERSED: [f64; 10] = [4.0, 6.0, 5.0, 3.0, 7.0, 5.0, 6.0, 4.0, 5.0, 6.0];

/// Batch (2 levels) then kinship (one level per observation).
fn batch_kinship_design(n: usize) -> DenseMatrix {
    DenseMatrix::from_fn(n, 2 + n, |i, j| {
        if j < 2 {
            if i % 2 == j { 1.0 } else { 0.0 }
        } else if j - 2 == i {
            1.0
        } else {
            0.0
        }
    })
}

fn data_with(y: &[f64], k: DenseMatrix, offsets: Vec<f64>) -> GlmmData {
    let n = y.len();
    let groupings = Groupings::contiguous(&["batch", "kinship"], &[2, n]).unwrap();
    GlmmData::new(
        DenseMatrix::full(n, 1, 1.0),
        batch_kinship_design(n),
        k,
        y.to_vec(),
        offsets,
        groupings,
    )
    .unwrap()
}

fn reference_data(y: &[f64]) -> GlmmData {
    data_with(y, DenseMatrix::identity(y.len()), vec![0.0; y.len()])
}

/// Intercept at log(mean y), no random effects, sigma = [1, 1].
fn mean_start(y: &[f64]) -> InitialEstimates {
    let n = y.len();
    let mean = y.iter().sum::<f64>() / n as f64;
    InitialEstimates {
        beta: vec![mean.ln()],
        u: vec![0.0; 2 + n],
        sigma: vec![1.0, 1.0],
        mu: vec![mean; n],
        dispersion: 1.0,
        g: None,
    }
}

fn run(y: &[f64], config: &FitConfig) -> GlmmFit {
    fit_glmm(&reference_data(y), &mean_start(y), config).expect("fit failed")
}

/// The trace length rule and the convergence/tolerance equivalence.
fn assert_trace_consistent(fit: &GlmmFit, tol: f64) {
    if fit.status.is_diverged() {
        assert_eq!(fit.trace.len(), fit.iterations + 1);
    } else {
        assert_eq!(fit.trace.len(), fit.iterations);
    }
    for (i, rec) in fit.trace.iter().enumerate() {
        assert_eq!(rec.iteration, i + 1);
    }
    let last = fit.trace.last().expect("empty trace");
    let below = last.theta_diff.iter().all(|&d| d < tol) && last.sigma_diff.iter().all(|&d| d < tol);
    assert_eq!(below, fit.converged);
}

mod scenario {
    use super::*;

    #[test]
    fn test_fisher_pseudo_likelihood_converges() {
        let config = FitConfig::default();
        let fit = run(&OVERDISPERSED, &config);

        assert_eq!(fit.status, FitStatus::Converged);
        assert!(fit.converged);
        assert!(fit.iterations <= 50);
        assert_eq!(fit.solver.kind(), SolverKind::Fisher);
        assert_trace_consistent(&fit, config.tol);

        assert!((fit.sigma[0] - 0.8373).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.sigma[1] - 0.0295).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.beta[0] - 1.6845).abs() < 1e-3, "beta = {:?}", fit.beta);
        // Close to the intercept-only estimate log(mean y)
        assert!((fit.beta[0] - 7.7_f64.ln()).abs() < 0.5);
    }

    #[test]
    fn test_outputs_are_consistent() {
        let fit = run(&OVERDISPERSED, &FitConfig::default());

        assert_eq!(fit.standard_errors.len(), 1);
        assert!(fit.standard_errors[0] > 0.0);
        assert!((fit.standard_errors[0] - 0.6687).abs() < 1e-2);
        assert!((fit.t_scores[0] - fit.beta[0] / fit.standard_errors[0]).abs() < 1e-12);

        assert_eq!(fit.coefficient_matrix.nrows(), 13);
        assert!(fit.coefficient_matrix.is_symmetric(1e-8));
        assert_eq!(fit.projection.nrows(), 10);
        assert_eq!(fit.partials.len(), 2);
        assert_eq!(fit.g_inv.nrows(), 12);
        assert_eq!(fit.v_star_inv.nrows(), 10);
        assert_eq!(fit.winv.len(), 10);
        assert_eq!(fit.information.nrows(), 2);
        assert!(fit.vcov.is_symmetric(1e-12));
        assert_eq!(fit.dispersion, 1.0);

        assert_eq!(fit.random_effects.len(), 2);
        assert_eq!(fit.random_effects[0].name, "batch");
        assert_eq!(fit.random_effects[0].values.len(), 2);
        assert_eq!(fit.random_effects[1].levels.len(), 10);
        assert_eq!(fit.random_effects[1].values[3], fit.u[5]);
    }

    #[test]
    fn test_reml_converges() {
        let config = FitConfig {
            reml: true,
            ..FitConfig::default()
        };
        let fit = run(&OVERDISPERSED, &config);
        assert!(fit.converged);
        assert_trace_consistent(&fit, config.tol);
        assert!((fit.sigma[0] - 1.7408).abs() < 2e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.sigma[1] - 0.0296).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.beta[0] - 1.6639).abs() < 1e-3);
    }

    #[test]
    fn test_restart_from_converged_state_is_fixed_point() {
        let config = FitConfig::default();
        let data = reference_data(&OVERDISPERSED);
        let first = fit_glmm(&data, &mean_start(&OVERDISPERSED), &config).unwrap();
        assert!(first.converged);

        let again = fit_glmm(&data, &first.restart_estimates(), &config).unwrap();
        assert!(again.converged);
        assert_eq!(again.iterations, 1);
        let rec = &again.trace[0];
        assert!(rec.theta_diff.iter().all(|&d| d < config.tol));
        assert!(rec.sigma_diff.iter().all(|&d| d < config.tol));
    }

    #[test]
    fn test_explicit_initial_g_matches_broadcast() {
        let config = FitConfig::default();
        let data = reference_data(&OVERDISPERSED);
        let mut init = mean_start(&OVERDISPERSED);
        let implicit = fit_glmm(&data, &init, &config).unwrap();

        init.g = Some(plglmm_core::glmm::covariance::broadcast_g(&data.groupings, &init.sigma, &data.k).unwrap());
        let explicit = fit_glmm(&data, &init, &config).unwrap();
        assert_eq!(implicit.iterations, explicit.iterations);
        assert!((implicit.beta[0] - explicit.beta[0]).abs() < 1e-12);
    }

    #[test]
    fn test_iteration_budget() {
        let config = FitConfig {
            max_iter: 2,
            ..FitConfig::default()
        };
        let fit = run(&OVERDISPERSED, &config);
        assert_eq!(fit.status, FitStatus::MaxIterReached);
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 3);
        assert_trace_consistent(&fit, config.tol);
    }
}

mod solvers {
    use super::*;

    #[test]
    fn test_negative_fisher_step_switches_to_nnls() {
        let config = FitConfig::default();
        let fit = run(&MILD, &config);
        assert!(fit.converged);
        assert!(fit.solver.is_constrained());
        assert_trace_consistent(&fit, config.tol);
        assert!((fit.sigma[0] - 0.1935).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.sigma[1] - 0.1142).abs() < 1e-3, "sigma = {:?}", fit.sigma);

        // Once constrained, always constrained
        let first = fit
            .trace
            .iter()
            .position(|r| r.solver == SolverKind::ConstrainedHasemanElston)
            .expect("no switch recorded");
        assert!(fit.trace[first..]
            .iter()
            .all(|r| r.solver == SolverKind::ConstrainedHasemanElston));
        assert!(fit.trace.iter().all(|r| r.sigma.iter().all(|&s| s >= 0.0)));
    }

    #[test]
    fn test_haseman_elston_solvers_agree() {
        let he = run(
            &OVERDISPERSED,
            &FitConfig {
                solver: SolverKind::HasemanElston,
                ..FitConfig::default()
            },
        );
        let nnls = run(
            &OVERDISPERSED,
            &FitConfig {
                solver: SolverKind::ConstrainedHasemanElston,
                ..FitConfig::default()
            },
        );
        assert!(he.converged && nnls.converged);
        assert_eq!(he.solver.kind(), SolverKind::HasemanElston);
        assert!(nnls.solver.is_constrained());
        for (a, b) in he.sigma.iter().zip(nnls.sigma.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!((he.sigma[0] - 1.4339).abs() < 1e-3, "sigma = {:?}", he.sigma);
        assert!((he.sigma[1] - 0.1099).abs() < 1e-3, "sigma = {:?}", he.sigma);
    }

    #[test]
    fn test_negative_binomial() {
        let config = FitConfig {
            family: VarianceFamily::NegativeBinomial,
            ..FitConfig::default()
        };
        let fit = run(&OVERDISPERSED, &config);
        assert!(fit.converged);
        assert_trace_consistent(&fit, config.tol);
        assert!((fit.sigma[0] - 1.6576).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        assert!((fit.sigma[1] - 0.2244).abs() < 1e-3, "sigma = {:?}", fit.sigma);
        // W^-1 = 1 / (1/mu + 1) under unit dispersion
        assert!(fit.winv.iter().all(|&w| w > 0.0 && w < 1.0));
    }
}

mod divergence {
    use super::*;

    #[test]
    fn test_overflowing_means_diverge_inf() {
        let n = OVERDISPERSED.len();
        let data = data_with(&OVERDISPERSED, DenseMatrix::identity(n), vec![1000.0; n]);
        let config = FitConfig::default();
        let fit = fit_glmm(&data, &mean_start(&OVERDISPERSED), &config).unwrap();

        assert_eq!(fit.status, FitStatus::DivergedInf);
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 0);
        assert_eq!(fit.trace.len(), 1);
        assert!(fit.mu.iter().any(|m| m.is_infinite()));
        assert_trace_consistent(&fit, config.tol);
    }
}

mod zero_component {
    use super::*;

    #[test]
    fn test_zero_batch_component_converges() {
        // HE-NNLS puts the batch component at zero on the first iteration;
        // its effects are pinned and the kinship component carries on.
        let config = FitConfig::default();
        let fit = run(&UNDERDISPERSED, &config);

        assert_eq!(fit.status, FitStatus::Converged);
        assert!(fit.converged);
        assert_eq!(fit.iterations, 5);
        assert_trace_consistent(&fit, config.tol);
        assert!(fit.solver.is_constrained());

        assert_eq!(fit.sigma[0], 0.0);
        assert!((fit.sigma[1] - 0.05402).abs() < 1e-4, "sigma = {:?}", fit.sigma);
        assert!((fit.beta[0] - 1.62809).abs() < 1e-4, "beta = {:?}", fit.beta);
        assert!(fit.trace.iter().all(|r| r.sigma[0] == 0.0));

        assert_eq!(fit.u[0], 0.0);
        assert_eq!(fit.u[1], 0.0);
        assert!(fit.u[2..].iter().any(|&v| v != 0.0));
        assert_eq!(fit.active_columns, (2..12).collect::<Vec<_>>());
        assert_eq!(fit.coefficient_matrix.nrows(), 11);
        assert!(fit.g_inv.is_finite());
        assert_eq!(fit.g_inv.get(0, 0), 0.0);
        assert!(fit.standard_errors[0].is_finite() && fit.standard_errors[0] > 0.0);
    }

    #[test]
    fn test_zero_batch_component_converges_under_reml() {
        let config = FitConfig {
            reml: true,
            ..FitConfig::default()
        };
        let fit = run(&UNDERDISPERSED, &config);
        assert!(fit.converged);
        assert_eq!(fit.sigma[0], 0.0);
        assert!((fit.sigma[1] - 0.05402).abs() < 1e-4, "sigma = {:?}", fit.sigma);
    }
}

/// Counts with no batch or kinship signal: Poisson(5) draws on the
/// reference design.
mod no_signal {
    use super::*;

    const DRAWS: [[f64; 10]; 12] = [
        [7.0, 7.0, 9.0, 9.0, 4.0, 5.0, 5.0, 5.0, 9.0, 3.0],
        [5.0, 3.0, 3.0, 5.0, 3.0, 2.0, 4.0, 3.0, 6.0, 8.0],
        [3.0, 7.0, 8.0, 2.0, 5.0, 5.0, 12.0, 11.0, 4.0, 9.0],
        [5.0, 2.0, 6.0, 7.0, 3.0, 9.0, 5.0, 11.0, 9.0, 5.0],
        [3.0, 5.0, 3.0, 6.0, 7.0, 4.0, 9.0, 3.0, 3.0, 5.0],
        [7.0, 6.0, 2.0, 5.0, 2.0, 7.0, 8.0, 2.0, 1.0, 6.0],
        [4.0, 8.0, 6.0, 6.0, 3.0, 9.0, 4.0, 5.0, 4.0, 3.0],
        [3.0, 3.0, 2.0, 3.0, 6.0, 3.0, 5.0, 2.0, 5.0, 8.0],
        [4.0, 6.0, 3.0, 1.0, 4.0, 5.0, 6.0, 8.0, 4.0, 6.0],
        [4.0, 5.0, 5.0, 7.0, 4.0, 4.0, 5.0, 4.0, 3.0, 2.0],
        [7.0, 5.0, 8.0, 5.0, 5.0, 5.0, 2.0, 7.0, 3.0, 5.0],
        [6.0, 5.0, 7.0, 2.0, 2.0, 8.0, 7.0, 6.0, 5.0, 4.0],
    ];

    #[test]
    fn test_every_draw_converges() {
        let config = FitConfig::default();
        for y in &DRAWS {
            let fit = run(y, &config);
            assert!(fit.converged, "{:?}: {:?}", y, fit.status);
            assert!(fit.iterations <= 10, "{:?}: {} iterations", y, fit.iterations);
            assert_trace_consistent(&fit, config.tol);
            assert!(fit.sigma.iter().all(|&s| (0.0..0.5).contains(&s)), "{:?}: sigma = {:?}", y, fit.sigma);
            assert!(fit.beta[0].is_finite());
            assert!(fit.u.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_first_draw() {
        let fit = run(&DRAWS[0], &FitConfig::default());
        assert!(fit.converged);
        assert_eq!(fit.iterations, 5);
        assert_eq!(fit.sigma[0], 0.0);
        assert!((fit.sigma[1] - 0.12014).abs() < 1e-4, "sigma = {:?}", fit.sigma);
        assert!((fit.beta[0] - 1.83023).abs() < 1e-4, "beta = {:?}", fit.beta);
    }
}

mod singular_kinship {
    use super::*;
    use plglmm_core::glmm::covariance::invert_kinship;

    fn half_rank_kinship(n: usize) -> DenseMatrix {
        let half = n / 2;
        let mut k = DenseMatrix::zeros(n, n);
        let block = DenseMatrix::from_fn(half, half, |i, j| if i == j { 1.0 } else { 0.1 });
        k.set_block(0, 0, &block);
        k
    }

    #[test]
    fn test_singular_kinship_is_not_fatal() {
        let n = OVERDISPERSED.len();
        let k = half_rank_kinship(n);
        assert!(invert_kinship(&k).unwrap().block_fallback);

        let data = data_with(&OVERDISPERSED, k, vec![0.0; n]);
        let fit = fit_glmm(&data, &mean_start(&OVERDISPERSED), &FitConfig::default())
            .expect("singular kinship must fall back, not fail");
        assert!(fit.status.is_terminal());
        assert!(!fit.trace.is_empty());
    }
}

mod structural_errors {
    use super::*;

    #[test]
    fn test_response_length_mismatch() {
        let n = 10;
        let groupings = Groupings::contiguous(&["batch", "kinship"], &[2, n]).unwrap();
        let err = GlmmData::new(
            DenseMatrix::full(n, 1, 1.0),
            batch_kinship_design(n),
            DenseMatrix::identity(n),
            vec![1.0; n - 1],
            vec![0.0; n],
            groupings,
        )
        .unwrap_err();
        assert_eq!(
            err,
            GlmmError::DimensionMismatch {
                what: "response",
                expected: 10,
                got: 9
            }
        );
    }

    #[test]
    fn test_kinship_width_mismatch() {
        let n = 10;
        let groupings = Groupings::contiguous(&["batch", "kinship"], &[2, n]).unwrap();
        let err = GlmmData::new(
            DenseMatrix::full(n, 1, 1.0),
            batch_kinship_design(n),
            DenseMatrix::identity(n - 1),
            OVERDISPERSED.to_vec(),
            vec![0.0; n],
            groupings,
        );
        assert!(matches!(err, Err(GlmmError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_initial_sigma_length() {
        let data = reference_data(&OVERDISPERSED);
        let mut init = mean_start(&OVERDISPERSED);
        init.sigma = vec![1.0];
        let err = fit_glmm(&data, &init, &FitConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            GlmmError::DimensionMismatch {
                what: "initial sigma",
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_non_finite_offsets_rejected() {
        let n = OVERDISPERSED.len();
        let groupings = Groupings::contiguous(&["batch", "kinship"], &[2, n]).unwrap();
        let mut offsets = vec![0.0; n];
        offsets[3] = f64::NAN;
        let err = GlmmData::new(
            DenseMatrix::full(n, 1, 1.0),
            batch_kinship_design(n),
            DenseMatrix::identity(n),
            OVERDISPERSED.to_vec(),
            offsets,
            groupings,
        )
        .unwrap_err();
        assert_eq!(err, GlmmError::NonFiniteInput("offsets"));
    }
}

mod initialisation {
    use super::*;
    use plglmm_core::glmm::initial::initial_estimates;

    #[test]
    fn test_glm_start_fits_like_mean_start() {
        let data = reference_data(&OVERDISPERSED);
        let init = initial_estimates(
            &data.y,
            &data.x,
            data.n_random(),
            &data.offsets,
            vec![1.0, 1.0],
            VarianceFamily::Poisson,
        )
        .unwrap();
        let fit = fit_glmm(&data, &init, &FitConfig::default()).unwrap();
        assert!(fit.converged);
        assert!((fit.sigma[0] - 0.8373).abs() < 1e-3);
    }
}
