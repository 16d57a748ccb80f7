//! Combinators turning per site results into one round result.

mod meta;
mod weighted;

pub use meta::{FitSummary, PooledFit, inverse_variance, pool_fit};
pub use weighted::WeightedAverage;
