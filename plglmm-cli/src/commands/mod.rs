pub mod fit;
pub mod summary;
