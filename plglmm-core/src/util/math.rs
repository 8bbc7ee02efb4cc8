//! Numeric helpers over slices.

/// True if any entry is NaN.
pub fn any_nan(v: &[f64]) -> bool {
    v.iter().any(|x| x.is_nan())
}

/// True if any entry is +/- infinity.
pub fn any_infinite(v: &[f64]) -> bool {
    v.iter().any(|x| x.is_infinite())
}

/// True if every entry is finite.
pub fn all_finite(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Element-wise |a - b|.
pub fn abs_diff(a: &[f64], b: &[f64]) -> Vec<f64> {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).collect()
}

/// Largest entry of a non-negative vector, 0 when empty. NaN propagates.
pub fn max_entry(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |acc, &x| if x.is_nan() || acc.is_nan() { f64::NAN } else { acc.max(x) })
}

/// True if every entry is strictly below `tol`. NaN entries fail.
pub fn all_below(v: &[f64], tol: f64) -> bool {
    v.iter().all(|&x| x < tol)
}

/// Mean of a slice; NaN when empty.
pub fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}
