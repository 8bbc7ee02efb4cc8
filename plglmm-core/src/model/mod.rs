//! Fitted-model persistence.

pub mod fitted_model;
pub mod serialization;

pub use fitted_model::FittedModel;
