//! Delimited count table parser.
//!
//! Reads tab/space-delimited files with a sample ID column, a count
//! response, numeric covariates, an optional offset column and any number
//! of categorical random-effect columns.

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

/// Which columns of the table play which role.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub sample_id_col: String,
    pub response_col: String,
    pub covar_cols: Vec<String>,
    pub offset_col: Option<String>,
    /// Categorical columns, each becoming one i.i.d. random-effect grouping.
    pub random_cols: Vec<String>,
}

/// Parsed table, one entry per data line in file order.
#[derive(Debug, Clone)]
pub struct CountTable {
    pub sample_ids: Vec<String>,
    /// Counts (NaN for missing).
    pub response: Vec<f64>,
    /// covariates[i][j] = sample i, covariate j (NaN for missing).
    pub covariates: Vec<Vec<f64>>,
    pub covariate_names: Vec<String>,
    /// Offsets on the log scale; zeros when no offset column is given.
    pub offsets: Vec<f64>,
    /// random[i][j] = level of sample i in random column j (None for missing).
    pub random: Vec<Vec<Option<String>>>,
    pub random_names: Vec<String>,
}

impl CountTable {
    pub fn len(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// Rows with every used field present.
    pub fn complete_rows(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| {
                !self.response[i].is_nan()
                    && !self.offsets[i].is_nan()
                    && self.covariates[i].iter().all(|v| !v.is_nan())
                    && self.random[i].iter().all(Option::is_some)
            })
            .collect()
    }
}

fn column_index(headers: &[&str], name: &str, role: &str) -> Result<usize> {
    headers
        .iter()
        .position(|&h| h == name)
        .ok_or_else(|| anyhow!("{} column '{}' not found in header", role, name))
}

/// Parse a count table.
pub fn parse_count_table(path: &Path, spec: &TableSpec) -> Result<CountTable> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read count table: {}", path.display()))?;

    let mut lines = contents.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| anyhow!("Empty count table: {}", path.display()))?;

    let delim = if header_line.contains('\t') { '\t' } else { ' ' };
    let headers: Vec<&str> = header_line
        .split(delim)
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect();

    let id_idx = column_index(&headers, &spec.sample_id_col, "Sample ID")?;
    let response_idx = column_index(&headers, &spec.response_col, "Response")?;
    let covar_idx = spec
        .covar_cols
        .iter()
        .map(|c| column_index(&headers, c, "Covariate"))
        .collect::<Result<Vec<_>>>()?;
    let offset_idx = spec
        .offset_col
        .as_deref()
        .map(|c| column_index(&headers, c, "Offset"))
        .transpose()?;
    let random_idx = spec
        .random_cols
        .iter()
        .map(|c| column_index(&headers, c, "Random-effect"))
        .collect::<Result<Vec<_>>>()?;

    let mut table = CountTable {
        sample_ids: Vec::new(),
        response: Vec::new(),
        covariates: Vec::new(),
        covariate_names: spec.covar_cols.clone(),
        offsets: Vec::new(),
        random: Vec::new(),
        random_names: spec.random_cols.clone(),
    };

    for (line_num, line) in lines.enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line
            .split(delim)
            .map(str::trim)
            .filter(|f| !f.is_empty() || delim == '\t')
            .collect();
        if fields.len() != headers.len() {
            bail!(
                "Line {} has {} fields, header has {}",
                line_num + 2,
                fields.len(),
                headers.len()
            );
        }

        let y = parse_value(fields[response_idx]);
        if y < 0.0 {
            bail!(
                "Line {}: negative count {} in response column '{}'",
                line_num + 2,
                y,
                spec.response_col
            );
        }

        table.sample_ids.push(fields[id_idx].to_string());
        table.response.push(y);
        table
            .covariates
            .push(covar_idx.iter().map(|&c| parse_value(fields[c])).collect());
        table
            .offsets
            .push(offset_idx.map_or(0.0, |c| parse_value(fields[c])));
        table.random.push(
            random_idx
                .iter()
                .map(|&c| (!is_missing(fields[c])).then(|| fields[c].to_string()))
                .collect(),
        );
    }

    if table.is_empty() {
        bail!("Count table {} has no data lines", path.display());
    }
    Ok(table)
}

fn is_missing(s: &str) -> bool {
    matches!(s, "NA" | "na" | "Na" | "." | "" | "-" | "NaN" | "nan")
}

/// Parse a numeric field, treating NA/missing as NaN.
fn parse_value(s: &str) -> f64 {
    if is_missing(s) {
        f64::NAN
    } else {
        s.parse().unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spec() -> TableSpec {
        TableSpec {
            sample_id_col: "IID".into(),
            response_col: "count".into(),
            covar_cols: vec!["age".into()],
            offset_col: Some("logsize".into()),
            random_cols: vec!["batch".into()],
        }
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("3"), 3.0);
        assert_eq!(parse_value("0.5"), 0.5);
        assert!(parse_value("NA").is_nan());
        assert!(parse_value(".").is_nan());
        assert!(parse_value("abc").is_nan());
    }

    #[test]
    fn test_parse_count_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "IID\tcount\tage\tlogsize\tbatch").unwrap();
        writeln!(f, "S1\t4\t45\t0.1\tA").unwrap();
        writeln!(f, "S2\t0\t50\t0.2\tB").unwrap();
        writeln!(f, "S3\tNA\t55\t0.3\tA").unwrap();
        writeln!(f, "S4\t7\t60\t0.4\tNA").unwrap();

        let table = parse_count_table(&path, &spec()).unwrap();
        assert_eq!(table.sample_ids, vec!["S1", "S2", "S3", "S4"]);
        assert_eq!(table.response[0], 4.0);
        assert!(table.response[2].is_nan());
        assert_eq!(table.covariates[1], vec![50.0]);
        assert_eq!(table.offsets, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(table.random[0], vec![Some("A".to_string())]);
        assert_eq!(table.random[3], vec![None]);
        assert_eq!(table.complete_rows(), vec![0, 1]);
    }

    #[test]
    fn test_space_delimited_without_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.txt");
        std::fs::write(&path, "IID count age batch\nS1 2 30 x\nS2 5 31 y\n").unwrap();
        let mut s = spec();
        s.offset_col = None;
        let table = parse_count_table(&path, &s).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.offsets, vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_column_and_negative_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.tsv");
        std::fs::write(&path, "IID\tcount\tage\tlogsize\n").unwrap();
        let err = parse_count_table(&path, &spec()).unwrap_err();
        assert!(err.to_string().contains("batch"));

        std::fs::write(&path, "IID\tcount\tage\tlogsize\tbatch\nS1\t-1\t3\t0\tA\n").unwrap();
        let err = parse_count_table(&path, &spec()).unwrap_err();
        assert!(err.to_string().contains("negative count"));
    }
}
