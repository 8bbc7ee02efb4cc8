//! plglmm-io: Input handling for plglmm
//!
//! Parses count tables, reads and writes kinship matrices in MatrixMarket
//! coordinate form, matches sample IDs and assembles the model inputs.

pub mod design;
pub mod kinship_io;
pub mod sample;
pub mod table;

pub use design::{build_model_inputs, ModelInputs};
pub use kinship_io::{read_kinship, write_kinship, Kinship};
pub use table::{parse_count_table, CountTable, TableSpec};
