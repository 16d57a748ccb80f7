pub mod aggregation;
pub mod dataset;
pub mod distributions;
pub mod error;
pub mod linalg;
pub mod metrics;
pub mod models;
pub mod wald;

pub use error::{MlErr, Result};
