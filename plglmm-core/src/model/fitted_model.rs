//! FittedModel: a finished GLMM fit together with the sample and
//! covariate labels needed to interpret it.

use serde::{Deserialize, Serialize};

use crate::glmm::fit::{FitConfig, GlmmFit};

/// One row of the fixed-effect table.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedEffectRow {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_score: f64,
}

/// The fitted model, serialized to .plglmm.model files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedModel {
    /// Magic bytes for validation.
    pub magic: [u8; 4],
    /// Version number for forward compatibility.
    pub version: u32,
    /// Sample IDs in model order.
    pub sample_ids: Vec<String>,
    /// Fixed-effect column names, aligned with `fit.beta`.
    pub covariate_names: Vec<String>,
    /// Settings the fit ran with.
    pub config: FitConfig,
    pub fit: GlmmFit,
}

impl FittedModel {
    /// Magic bytes: "PLGM" (Pseudo-Likelihood Glmm Model).
    pub const MAGIC: [u8; 4] = [b'P', b'L', b'G', b'M'];
    /// Current model version.
    pub const VERSION: u32 = 1;

    pub fn new(
        sample_ids: Vec<String>,
        covariate_names: Vec<String>,
        config: FitConfig,
        fit: GlmmFit,
    ) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            sample_ids,
            covariate_names,
            config,
            fit,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Estimate, standard error and t-score per fixed effect.
    pub fn fixed_effects(&self) -> Vec<FixedEffectRow> {
        self.fit
            .beta
            .iter()
            .enumerate()
            .map(|(i, &estimate)| FixedEffectRow {
                name: self
                    .covariate_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("beta{}", i)),
                estimate,
                std_error: self.fit.standard_errors.get(i).copied().unwrap_or(f64::NAN),
                t_score: self.fit.t_scores.get(i).copied().unwrap_or(f64::NAN),
            })
            .collect()
    }
}
