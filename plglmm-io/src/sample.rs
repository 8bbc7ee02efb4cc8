//! Sample ID matching between the count table and the kinship.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};

/// Samples present in every source.
#[derive(Debug, Clone)]
pub struct SampleIntersection {
    /// Shared IDs, in the order of the first source.
    pub ids: Vec<String>,
    /// indices[s][k] = position of `ids[k]` in source `s`.
    pub indices: Vec<Vec<usize>>,
}

impl SampleIntersection {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Intersect sample IDs across sources, keeping the first source's order.
pub fn intersect_samples(sources: &[&[String]]) -> SampleIntersection {
    let Some((primary, rest)) = sources.split_first() else {
        return SampleIntersection {
            ids: Vec::new(),
            indices: Vec::new(),
        };
    };

    let maps: Vec<HashMap<&str, usize>> = rest
        .iter()
        .map(|ids| ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect())
        .collect();

    let mut ids = Vec::new();
    let mut indices: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];
    for (i, id) in primary.iter().enumerate() {
        let hits: Option<Vec<usize>> = maps.iter().map(|m| m.get(id.as_str()).copied()).collect();
        if let Some(hits) = hits {
            ids.push(id.clone());
            indices[0].push(i);
            for (s, h) in hits.into_iter().enumerate() {
                indices[s + 1].push(h);
            }
        }
    }
    SampleIntersection { ids, indices }
}

/// Fail on the first repeated ID.
pub fn ensure_unique_ids(ids: &[String], source: &str) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            bail!("Sample ID '{}' appears more than once in {}", id, source);
        }
    }
    Ok(())
}

/// `data[indices[k]]` for each k.
pub fn reorder_vec<T: Clone>(data: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| data[i].clone()).collect()
}
