//! Kinship reader/writer in MatrixMarket coordinate format.
//!
//! A kinship is stored as two files:
//! - `<name>.mtx`: symmetric coordinate matrix (1-indexed row, col, value),
//!   upper or lower triangle only
//! - `<name>.ids`: sample IDs in matrix order, one per line

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};

use plglmm_linalg::sparse::SparseMatrix;

/// A kinship matrix with the sample IDs labelling its rows.
#[derive(Debug, Clone)]
pub struct Kinship {
    pub matrix: SparseMatrix,
    pub sample_ids: Vec<String>,
}

impl Kinship {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// Restrict to the given rows, in the given order.
    pub fn subset(&self, index: &[usize]) -> Kinship {
        Kinship {
            matrix: self.matrix.select(index),
            sample_ids: index.iter().map(|&i| self.sample_ids[i].clone()).collect(),
        }
    }
}

/// Read a kinship matrix and its sample IDs.
pub fn read_kinship(mtx_path: &Path, ids_path: &Path) -> Result<Kinship> {
    let sample_ids: Vec<String> = std::fs::read_to_string(ids_path)
        .with_context(|| format!("Failed to read kinship sample IDs: {}", ids_path.display()))?
        .lines()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();
    let n = sample_ids.len();

    let contents = std::fs::read_to_string(mtx_path)
        .with_context(|| format!("Failed to read kinship matrix: {}", mtx_path.display()))?;

    let mut rows = Vec::new();
    let mut cols = Vec::new();
    let mut vals = Vec::new();
    let mut dims: Option<(usize, usize)> = None;

    for (line_num, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            bail!(
                "{}:{}: expected 3 fields, found {}",
                mtx_path.display(),
                line_num + 1,
                fields.len()
            );
        }
        let parse_index = |s: &str| -> Result<usize> {
            s.parse::<usize>()
                .with_context(|| format!("{}:{}: bad index '{}'", mtx_path.display(), line_num + 1, s))
        };

        // First data line is the size line: nrows ncols nnz
        let Some((nrows, ncols)) = dims else {
            let (r, c) = (parse_index(fields[0])?, parse_index(fields[1])?);
            if r != n || c != n {
                bail!(
                    "Kinship matrix is {} x {} but {} lists {} sample IDs",
                    r,
                    c,
                    ids_path.display(),
                    n
                );
            }
            dims = Some((r, c));
            continue;
        };

        let row = parse_index(fields[0])?;
        let col = parse_index(fields[1])?;
        if row == 0 || col == 0 || row > nrows || col > ncols {
            bail!(
                "{}:{}: entry ({}, {}) outside a {} x {} matrix",
                mtx_path.display(),
                line_num + 1,
                row,
                col,
                nrows,
                ncols
            );
        }
        let val: f64 = fields[2]
            .parse()
            .with_context(|| format!("{}:{}: bad value '{}'", mtx_path.display(), line_num + 1, fields[2]))?;
        let (i, j) = (row - 1, col - 1);
        rows.push(i);
        cols.push(j);
        vals.push(val);
        // Mirror off-diagonal entries
        if i != j {
            rows.push(j);
            cols.push(i);
            vals.push(val);
        }
    }

    if dims.is_none() {
        bail!("Kinship matrix {} has no size line", mtx_path.display());
    }

    let matrix = SparseMatrix::from_triplets(n, n, &rows, &cols, &vals);
    Ok(Kinship { matrix, sample_ids })
}

/// Write a kinship matrix (upper triangle) and its sample IDs.
pub fn write_kinship(kinship: &Kinship, mtx_path: &Path, ids_path: &Path) -> Result<()> {
    let mut f = std::fs::File::create(ids_path)
        .with_context(|| format!("Failed to create {}", ids_path.display()))?;
    for id in &kinship.sample_ids {
        writeln!(f, "{}", id)?;
    }

    let entries: Vec<(usize, usize, f64)> = kinship
        .matrix
        .triplets()
        .into_iter()
        .filter(|&(i, j, _)| j >= i)
        .collect();

    let mut f = std::fs::File::create(mtx_path)
        .with_context(|| format!("Failed to create {}", mtx_path.display()))?;
    writeln!(f, "%%MatrixMarket matrix coordinate real symmetric")?;
    let n = kinship.matrix.nrows();
    writeln!(f, "{} {} {}", n, n, entries.len())?;
    for (i, j, v) in entries {
        writeln!(f, "{} {} {:.10}", i + 1, j + 1, v)?;
    }
    Ok(())
}
