//! Fit the GLMM.
//!
//! plglmm fit --counts-file ... --response-col ... --kinship-mtx ... --kinship-ids ... --output-prefix ...

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use plglmm_core::glmm::fit::{fit_glmm, FitConfig};
use plglmm_core::glmm::initial::initial_estimates;
use plglmm_core::glmm::{SolverKind, VarianceFamily};
use plglmm_core::model::serialization;
use plglmm_core::model::FittedModel;
use plglmm_io::{build_model_inputs, parse_count_table, read_kinship, TableSpec};

#[derive(Args)]
pub struct FitArgs {
    /// Count table (tab or space delimited, with header)
    #[arg(long)]
    counts_file: String,

    /// Count response column name
    #[arg(long)]
    response_col: String,

    /// Covariate column names (comma-separated)
    #[arg(long, default_value = "")]
    covar_cols: String,

    /// Categorical random-effect column names (comma-separated)
    #[arg(long, default_value = "")]
    random_cols: String,

    /// Log-scale offset column name
    #[arg(long)]
    offset_col: Option<String>,

    /// Sample ID column name
    #[arg(long, default_value = "IID")]
    sample_id_col: String,

    /// Kinship matrix in MatrixMarket coordinate format
    #[arg(long)]
    kinship_mtx: String,

    /// Kinship sample IDs, one per line in matrix order
    #[arg(long)]
    kinship_ids: String,

    /// Use REML score and information for the variance components
    #[arg(long, default_value = "false")]
    reml: bool,

    /// Variance-component solver: Fisher, HE or HE-NNLS
    #[arg(long, default_value = "Fisher")]
    solver: String,

    /// Variance family: P (Poisson) or NB (negative binomial)
    #[arg(long, default_value = "P")]
    family: String,

    /// Convergence tolerance
    #[arg(long, default_value = "1e-6")]
    tol: f64,

    /// Maximum iterations
    #[arg(long, default_value = "50")]
    max_iter: usize,

    /// Initial variance components (comma-separated, one per random
    /// column then the kinship; default 1 each)
    #[arg(long)]
    sigma_init: Option<String>,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,

    /// Also save JSON sidecar for inspection
    #[arg(long, default_value = "false")]
    save_json: bool,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

fn parse_sigma(s: &str, expected: usize) -> Result<Vec<f64>> {
    let sigma = split_list(s)
        .iter()
        .map(|v| {
            v.parse::<f64>()
                .with_context(|| format!("Invalid --sigma-init value '{}'", v))
        })
        .collect::<Result<Vec<_>>>()?;
    if sigma.len() != expected {
        bail!(
            "--sigma-init has {} values but the model has {} variance components",
            sigma.len(),
            expected
        );
    }
    if sigma.iter().any(|&v| v <= 0.0) {
        bail!("--sigma-init values must be positive, got {:?}", sigma);
    }
    Ok(sigma)
}

pub fn run(args: FitArgs) -> Result<()> {
    let solver: SolverKind = args.solver.parse().map_err(|e: String| anyhow!(e))?;
    let family: VarianceFamily = args.family.parse().map_err(|e: String| anyhow!(e))?;
    let config = FitConfig {
        tol: args.tol,
        max_iter: args.max_iter,
        reml: args.reml,
        solver,
        family,
    };

    info!("=== plglmm fit ===");
    info!("Count table: {}", args.counts_file);
    info!("Response column: {}", args.response_col);
    info!("Kinship: {} ({})", args.kinship_mtx, args.kinship_ids);

    let spec = TableSpec {
        sample_id_col: args.sample_id_col.clone(),
        response_col: args.response_col.clone(),
        covar_cols: split_list(&args.covar_cols),
        offset_col: args.offset_col.clone(),
        random_cols: split_list(&args.random_cols),
    };
    let table = parse_count_table(Path::new(&args.counts_file), &spec)?;
    info!("Loaded {} table rows", table.len());

    let kinship = read_kinship(Path::new(&args.kinship_mtx), Path::new(&args.kinship_ids))?;
    info!(
        "Loaded {} x {} kinship with {} stored entries",
        kinship.len(),
        kinship.len(),
        kinship.matrix.nnz()
    );

    let inputs = build_model_inputs(&table, &kinship)?;
    let data = &inputs.data;
    let c = data.n_components();
    let sigma = match &args.sigma_init {
        Some(s) => parse_sigma(s, c)?,
        None => vec![1.0; c],
    };

    let init = initial_estimates(
        &data.y,
        &data.x,
        data.n_random(),
        &data.offsets,
        sigma,
        config.family,
    )
    .context("Initial GLM fit failed")?;
    info!("Initial fixed effects: {:?}", init.beta);

    let fit = fit_glmm(data, &init, &config).context("GLMM fit failed")?;
    if !fit.converged {
        warn!(
            "Fit did not converge: {:?} after {} iterations",
            fit.status, fit.iterations
        );
    }

    let model = FittedModel::new(
        inputs.sample_ids.clone(),
        inputs.covariate_names.clone(),
        config,
        fit,
    );

    let model_path = Path::new(&args.output_prefix).with_extension("plglmm.model");
    serialization::save_model(&model, &model_path)?;
    info!("Model saved to {}", model_path.display());

    if args.save_json {
        let json_path = Path::new(&args.output_prefix).with_extension("plglmm.model.json");
        serialization::save_model_json(&model, &json_path)?;
        info!("JSON sidecar saved to {}", json_path.display());
    }

    println!("{}", serialization::model_summary(&model));

    Ok(())
}
