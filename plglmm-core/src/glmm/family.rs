//! Count-data variance families.
//!
//! Both families use the log link. They differ only in how the variance
//! grows with the mean, which feeds the mean-variance and weight
//! matrices of the pseudo-likelihood linearization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Variance form of the count response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarianceFamily {
    /// Var(Y) = mu
    Poisson,
    /// Var(Y) = mu + mu^2 / disp
    NegativeBinomial,
}

impl VarianceFamily {
    /// Var(Y_i) at mean `mu` with dispersion `disp`.
    pub fn variance(&self, mu: f64, disp: f64) -> f64 {
        match self {
            VarianceFamily::Poisson => mu,
            VarianceFamily::NegativeBinomial => mu + mu * mu / disp,
        }
    }

    /// Diagonal of the pseudo-likelihood weight matrix,
    /// `W = D^{-1} Vmu D^{-1}` with `D = diag(mu)`.
    pub fn weight(&self, mu: f64, disp: f64) -> f64 {
        match self {
            VarianceFamily::Poisson => 1.0 / mu,
            VarianceFamily::NegativeBinomial => 1.0 / mu + 1.0 / disp,
        }
    }
}

impl Default for VarianceFamily {
    fn default() -> Self {
        VarianceFamily::Poisson
    }
}

impl fmt::Display for VarianceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarianceFamily::Poisson => write!(f, "P"),
            VarianceFamily::NegativeBinomial => write!(f, "NB"),
        }
    }
}

impl FromStr for VarianceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "p" | "poisson" => Ok(VarianceFamily::Poisson),
            "nb" | "negative-binomial" | "negbin" => Ok(VarianceFamily::NegativeBinomial),
            other => Err(format!(
                "unknown variance family '{}' (expected P or NB)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poisson_weights() {
        let fam = VarianceFamily::Poisson;
        assert_eq!(fam.variance(4.0, 1.0), 4.0);
        assert!((fam.weight(4.0, 1.0) - 0.25).abs() < 1e-15);
    }

    #[test]
    fn test_negative_binomial_weights() {
        let fam = VarianceFamily::NegativeBinomial;
        // mu = 2, disp = 4: Var = 2 + 4/4 = 3, W = 3 / 4
        assert!((fam.variance(2.0, 4.0) - 3.0).abs() < 1e-15);
        assert!((fam.weight(2.0, 4.0) - 0.75).abs() < 1e-15);
        // W matches D^{-1} Vmu D^{-1}
        let mu = 2.0;
        assert!((fam.weight(mu, 4.0) - fam.variance(mu, 4.0) / (mu * mu)).abs() < 1e-15);
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("P".parse::<VarianceFamily>().unwrap(), VarianceFamily::Poisson);
        assert_eq!(
            "negative-binomial".parse::<VarianceFamily>().unwrap(),
            VarianceFamily::NegativeBinomial
        );
        assert!("gaussian".parse::<VarianceFamily>().is_err());
        assert_eq!(VarianceFamily::NegativeBinomial.to_string(), "NB");
    }
}
