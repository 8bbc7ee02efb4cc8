//! Fixed- and random-effect designs built from a count table and kinship.
//!
//! The analysis samples are the complete table rows that also appear in
//! the kinship, in table order. Every categorical random-effect column
//! becomes an indicator block of `Z`; the kinship grouping is appended
//! last with one column per analysis sample.

use std::collections::BTreeSet;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use plglmm_core::glmm::{GlmmData, Groupings};
use plglmm_linalg::DenseMatrix;

use crate::kinship_io::Kinship;
use crate::sample::{ensure_unique_ids, intersect_samples, reorder_vec};
use crate::table::CountTable;

/// Name of the kinship-linked grouping.
pub const KINSHIP_GROUPING: &str = "kinship";

/// Model inputs aligned to the analysis samples.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub data: GlmmData,
    pub sample_ids: Vec<String>,
    /// Fixed-effect names, intercept first.
    pub covariate_names: Vec<String>,
}

/// Indicator columns for one categorical variable; levels are sorted.
fn indicator_block(values: &[&str]) -> (DenseMatrix, Vec<String>) {
    let levels: Vec<String> = values
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(String::from)
        .collect();
    let block = DenseMatrix::from_fn(values.len(), levels.len(), |i, j| {
        if values[i] == levels[j] { 1.0 } else { 0.0 }
    });
    (block, levels)
}

/// Align the table with the kinship and build `X`, `Z`, `K` and the groupings.
pub fn build_model_inputs(table: &CountTable, kinship: &Kinship) -> Result<ModelInputs> {
    ensure_unique_ids(&table.sample_ids, "the count table")?;
    ensure_unique_ids(&kinship.sample_ids, "the kinship IDs")?;

    let complete = table.complete_rows();
    let complete_ids = reorder_vec(&table.sample_ids, &complete);
    let shared = intersect_samples(&[&complete_ids, &kinship.sample_ids]);
    if shared.is_empty() {
        bail!("No complete table rows match a kinship sample ID");
    }
    info!(
        "{} of {} table rows are complete and in the kinship ({} kinship samples)",
        shared.len(),
        table.len(),
        kinship.len()
    );

    let rows: Vec<usize> = shared.indices[0].iter().map(|&k| complete[k]).collect();
    let kin = kinship.subset(&shared.indices[1]);
    let n = rows.len();

    let p = table.covariate_names.len();
    let x = DenseMatrix::from_fn(n, p + 1, |i, j| {
        if j == 0 { 1.0 } else { table.covariates[rows[i]][j - 1] }
    });
    let mut covariate_names = vec!["(Intercept)".to_string()];
    covariate_names.extend(table.covariate_names.iter().cloned());

    let mut blocks = Vec::with_capacity(table.random_names.len() + 1);
    let mut names = Vec::with_capacity(table.random_names.len() + 1);
    let mut level_labels = Vec::with_capacity(table.random_names.len() + 1);
    for (j, name) in table.random_names.iter().enumerate() {
        // complete_rows guarantees every level is present
        let values: Vec<&str> = rows
            .iter()
            .map(|&r| table.random[r][j].as_deref().unwrap_or_default())
            .collect();
        let (block, levels) = indicator_block(&values);
        if levels.len() < 2 {
            warn!(
                "Random-effect column '{}' has a single level among the analysis samples",
                name
            );
        }
        blocks.push(block);
        names.push(name.as_str());
        level_labels.push(levels);
    }
    blocks.push(DenseMatrix::identity(n));
    names.push(KINSHIP_GROUPING);
    level_labels.push(shared.ids.clone());

    let widths: Vec<usize> = blocks.iter().map(DenseMatrix::ncols).collect();
    let mut z = DenseMatrix::zeros(n, widths.iter().sum());
    let mut start = 0;
    for block in &blocks {
        z.set_block(0, start, block);
        start += block.ncols();
    }
    let mut groupings = Groupings::contiguous(&names, &widths)?;
    groupings.levels = level_labels;

    let data = GlmmData::new(
        x,
        z,
        kin.matrix.to_dense(),
        reorder_vec(&table.response, &rows),
        reorder_vec(&table.offsets, &rows),
        groupings,
    )
    .context("Inconsistent model inputs")?;

    Ok(ModelInputs {
        data,
        sample_ids: shared.ids,
        covariate_names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use plglmm_linalg::SparseMatrix;

    fn table() -> CountTable {
        CountTable {
            sample_ids: vec!["S1".into(), "S2".into(), "S3".into(), "S4".into()],
            response: vec![3.0, 5.0, f64::NAN, 1.0],
            covariates: vec![vec![0.5], vec![1.5], vec![2.5], vec![3.5]],
            covariate_names: vec!["age".into()],
            offsets: vec![0.0, 0.1, 0.2, 0.3],
            random: vec![
                vec![Some("b".into())],
                vec![Some("a".into())],
                vec![Some("a".into())],
                vec![Some("b".into())],
            ],
            random_names: vec!["batch".into()],
        }
    }

    fn kinship() -> Kinship {
        // S5 is not in the table; S3 has a missing response
        Kinship {
            matrix: SparseMatrix::from_triplets(
                4,
                4,
                &[0, 1, 2, 3, 0, 3],
                &[0, 1, 2, 3, 3, 0],
                &[1.0, 1.0, 1.0, 1.0, 0.5, 0.5],
            ),
            sample_ids: vec!["S4".into(), "S5".into(), "S3".into(), "S1".into()],
        }
    }

    #[test]
    fn test_build_model_inputs() {
        let inputs = build_model_inputs(&table(), &kinship()).unwrap();
        assert_eq!(inputs.sample_ids, vec!["S1", "S4"]);
        assert_eq!(inputs.covariate_names, vec!["(Intercept)", "age"]);

        let data = &inputs.data;
        assert_eq!(data.y, vec![3.0, 1.0]);
        assert_eq!(data.offsets, vec![0.0, 0.3]);
        assert_eq!(data.x.get(1, 1), 3.5);

        // batch: levels sorted, only "b" survives; then kinship identity
        assert_eq!(data.groupings.names, vec!["batch", "kinship"]);
        assert_eq!(data.groupings.levels[0], vec!["b"]);
        assert_eq!(data.groupings.levels[1], vec!["S1", "S4"]);
        assert_eq!(data.z.ncols(), 3);
        assert_eq!(data.z.get(0, 1), 1.0);
        assert_eq!(data.z.get(1, 2), 1.0);

        // K reordered to S1, S4
        assert_eq!(data.k.get(0, 1), 0.5);
        assert_eq!(data.k.get(1, 0), 0.5);
    }

    #[test]
    fn test_no_overlap_is_an_error() {
        let mut kin = kinship();
        kin.sample_ids = vec!["X1".into(), "X2".into(), "X3".into(), "X4".into()];
        assert!(build_model_inputs(&table(), &kin).is_err());
    }

    #[test]
    fn test_indicator_block() {
        let (block, levels) = indicator_block(&["y", "x", "y"]);
        assert_eq!(levels, vec!["x", "y"]);
        assert_eq!(block.get(0, 1), 1.0);
        assert_eq!(block.get(1, 0), 1.0);
        assert_eq!(block.get(2, 0), 0.0);
    }
}
