pub mod data_layer;
pub mod models;

pub use data_layer::{DataLayer, DbDataLayer};
