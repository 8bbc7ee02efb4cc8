//! Model serialization and deserialization.
//!
//! Uses bincode for fast, compact binary serialization.
//! Format: magic bytes (PLGM) + version (u32) + bincode payload.
//! Optional JSON sidecar for human inspection.

use anyhow::{bail, Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use super::fitted_model::FittedModel;

/// Save a fitted model to a binary file (.plglmm.model).
pub fn save_model(model: &FittedModel, path: &Path) -> Result<()> {
    let encoded = bincode::serialize(model)?;
    std::fs::write(path, &encoded)
        .with_context(|| format!("Failed to write model file {}", path.display()))?;
    Ok(())
}

/// Load a fitted model from a binary file (.plglmm.model).
pub fn load_model(path: &Path) -> Result<FittedModel> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read model file {}", path.display()))?;
    if data.len() < 4 || data[..4] != FittedModel::MAGIC {
        bail!(
            "Invalid model file {}: expected magic bytes {:?}",
            path.display(),
            FittedModel::MAGIC
        );
    }
    let model: FittedModel = bincode::deserialize(&data)
        .with_context(|| format!("Failed to decode model file {}", path.display()))?;

    if model.version > FittedModel::VERSION {
        bail!(
            "Model file version {} is newer than supported version {}",
            model.version,
            FittedModel::VERSION
        );
    }

    Ok(model)
}

/// Save a JSON sidecar for debugging (.plglmm.model.json).
pub fn save_model_json(model: &FittedModel, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(model)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Summary of a fitted model (for display).
pub fn model_summary(model: &FittedModel) -> String {
    let fit = &model.fit;
    let components: Vec<String> = fit
        .random_effects
        .iter()
        .zip(fit.sigma.iter())
        .map(|(re, s)| format!("{}={:.6}", re.name, s))
        .collect();
    let mut out = format!(
        "PL-GLMM Model v{}\n\
         Family: {}\n\
         REML: {}\n\
         Samples: {}\n\
         Covariates: {}\n\
         Status: {:?} after {} iterations\n\
         Solver: {}\n\
         Sigma: [{}]\n\
         Dispersion: {:.4}",
        model.version,
        model.config.family,
        if model.config.reml { "yes" } else { "no" },
        model.n_samples(),
        fit.beta.len(),
        fit.status,
        fit.iterations,
        fit.solver.kind(),
        components.join(", "),
        fit.dispersion,
    );
    out.push_str("\n\nFixed effects:\n");
    let _ = writeln!(
        out,
        "{:<20} {:>12} {:>12} {:>10}",
        "term", "estimate", "std.error", "t"
    );
    for row in model.fixed_effects() {
        let _ = writeln!(
            out,
            "{:<20} {:>12.6} {:>12.6} {:>10.3}",
            row.name, row.estimate, row.std_error, row.t_score
        );
    }
    out
}
