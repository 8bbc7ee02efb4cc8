//! Print a saved model.
//!
//! plglmm summary --model-file ...

use anyhow::Result;
use clap::Args;

use plglmm_core::model::serialization::{load_model, model_summary};

#[derive(Args)]
pub struct SummaryArgs {
    /// Model file written by `plglmm fit` (.plglmm.model)
    #[arg(long)]
    model_file: String,
}

pub fn run(args: SummaryArgs) -> Result<()> {
    let model = load_model(std::path::Path::new(&args.model_file))?;
    println!("Model: {}", args.model_file);
    println!("{}", model_summary(&model));
    Ok(())
}
