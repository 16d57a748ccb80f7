use log::warn;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};

use super::{pseudo_r2, sigmoid};
use crate::{
    MlErr, Result,
    distributions::chi2_sf,
    linalg::{invert_spd, solve_spd},
    wald::WaldTable,
};

/// Fewest ordered categories an ordinal model accepts.
pub const MIN_CATEGORIES: usize = 3;
/// Categories with fewer observations than this are reported as sparse.
pub const SPARSE_CATEGORY: usize = 5;

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-8;
const MIN_STEP: f64 = 1e-10;
const MIN_PROBABILITY: f64 = 1e-300;

/// An ordinal target recoded as consecutive categories `0..n_categories`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrdinalTarget {
    codes: Array1<f64>,
    levels: Vec<f64>,
    counts: Vec<usize>,
}

impl OrdinalTarget {
    /// Recodes the distinct values of `y` in ascending order.
    ///
    /// Values that are not already `0, 1, ..., k - 1` are remapped, and sparse
    /// categories are warned about.
    ///
    /// # Errors
    /// `MlErr::TooFewCategories` below `MIN_CATEGORIES` distinct values.
    pub fn encode(y: ArrayView1<'_, f64>) -> Result<Self> {
        let mut levels: Vec<f64> = y.to_vec();
        levels.sort_by(f64::total_cmp);
        levels.dedup();

        if levels.len() < MIN_CATEGORIES {
            return Err(MlErr::TooFewCategories {
                found: levels.len(),
                min: MIN_CATEGORIES,
            });
        }

        let consecutive = levels.iter().enumerate().all(|(i, &v)| v == i as f64);
        if !consecutive {
            warn!("ordinal categories {levels:?} are not consecutive from 0, remapping");
        }

        let mut counts = vec![0; levels.len()];
        let codes = y.mapv(|v| {
            let code = levels.partition_point(|&l| l < v);
            counts[code] += 1;
            code as f64
        });

        for (category, &count) in counts.iter().enumerate() {
            if count < SPARSE_CATEGORY {
                warn!("ordinal category {category} has only {count} observations");
            }
        }

        Ok(Self {
            codes,
            levels,
            counts,
        })
    }

    pub fn codes(&self) -> ArrayView1<'_, f64> {
        self.codes.view()
    }

    pub fn n_categories(&self) -> usize {
        self.levels.len()
    }

    /// Observations per recoded category.
    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// The original value of every recoded category.
    pub fn levels(&self) -> &[f64] {
        &self.levels
    }
}

/// Proportional odds fit: predictor coefficients, thresholds and fit statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalFit {
    #[serde(flatten)]
    pub coefficients: WaldTable,
    pub odds_ratio_ci_lower: Vec<f64>,
    pub odds_ratio_ci_upper: Vec<f64>,
    pub thresholds: Vec<f64>,
    pub threshold_std_err: Vec<f64>,
    pub threshold_z_values: Vec<f64>,
    pub threshold_p_values: Vec<f64>,
    pub threshold_conf_int_lower: Vec<f64>,
    pub threshold_conf_int_upper: Vec<f64>,
    pub prsquared: f64,
    pub llf: f64,
    pub llnull: f64,
    pub llr: f64,
    pub llr_df: usize,
    pub llr_pvalue: f64,
    pub aic: f64,
    pub bic: f64,
}

impl OrdinalFit {
    /// Assembles a fit from pooled or local coefficient and threshold tables.
    ///
    /// # Arguments
    /// * `coefficients` - Predictor coefficients.
    /// * `thresholds` - Cut points, ascending.
    /// * `llf` / `llnull` - Log-likelihoods of the full and thresholds only models.
    /// * `n` - The number of observations behind the likelihoods.
    pub fn from_tables(
        coefficients: WaldTable,
        thresholds: WaldTable,
        llf: f64,
        llnull: f64,
        n: usize,
    ) -> Self {
        let llr_df = coefficients.len();
        let llr = -2.0 * (llnull - llf);
        let k = (coefficients.len() + thresholds.len()) as f64;

        Self {
            odds_ratio_ci_lower: coefficients.conf_int_lower.iter().map(|v| v.exp()).collect(),
            odds_ratio_ci_upper: coefficients.conf_int_upper.iter().map(|v| v.exp()).collect(),
            coefficients,
            thresholds: thresholds.coef,
            threshold_std_err: thresholds.std_err,
            threshold_z_values: thresholds.z_values,
            threshold_p_values: thresholds.p_values,
            threshold_conf_int_lower: thresholds.conf_int_lower,
            threshold_conf_int_upper: thresholds.conf_int_upper,
            prsquared: pseudo_r2(llf, llnull),
            llf,
            llnull,
            llr,
            llr_df,
            llr_pvalue: chi2_sf(llr, llr_df),
            aic: 2.0 * k - 2.0 * llf,
            bic: k * (n.max(1) as f64).ln() - 2.0 * llf,
        }
    }

    pub fn n_categories(&self) -> usize {
        self.thresholds.len() + 1
    }
}

/// Cumulative logit model `P(y <= j) = σ(θ_j − x·β)` fitted by damped Newton.
///
/// Parameters are laid out as `[β_1 .. β_p, θ_0 .. θ_{k-2}]`.
pub struct OrdinalLogit {
    x: Array2<f64>,
    y: Vec<usize>,
    n_categories: usize,
}

impl OrdinalLogit {
    /// Fits the model on raw predictors and recoded categories.
    ///
    /// # Arguments
    /// * `x` - The predictors, no intercept column.
    /// * `codes` - Categories `0..n_categories` as produced by `OrdinalTarget`.
    /// * `n_categories` - The number of categories of the full target.
    ///
    /// # Errors
    /// `MlErr::EmptyCategory` if a category is absent from `codes`,
    /// `MlErr::NotConverged` or `MlErr::SingularMatrix` if no finite optimum is found.
    pub fn fit(
        x: ArrayView2<'_, f64>,
        codes: ArrayView1<'_, f64>,
        n_categories: usize,
    ) -> Result<OrdinalFit> {
        if x.nrows() != codes.len() {
            return Err(MlErr::SizeMismatch {
                a: "x",
                b: "y",
                got: x.nrows(),
                expected: codes.len(),
            });
        }
        if n_categories < MIN_CATEGORIES {
            return Err(MlErr::TooFewCategories {
                found: n_categories,
                min: MIN_CATEGORIES,
            });
        }

        let y: Vec<usize> = codes.iter().map(|&c| c as usize).collect();
        let mut counts = vec![0usize; n_categories];
        for &c in &y {
            if c >= n_categories {
                return Err(MlErr::SizeMismatch {
                    a: "category",
                    b: "categories",
                    got: c,
                    expected: n_categories,
                });
            }
            counts[c] += 1;
        }
        if let Some(category) = counts.iter().position(|&c| c == 0) {
            return Err(MlErr::EmptyCategory { category });
        }

        let model = Self {
            x: x.to_owned(),
            y,
            n_categories,
        };

        let params = model.optimise(model.initial_params(&counts))?;

        let hessian = model.hessian(&params);
        let cov = invert_spd((-hessian).view())?;
        let std_err: Vec<f64> = cov.diag().iter().map(|v| v.max(0.0).sqrt()).collect();

        let p = model.x.ncols();
        let n = model.y.len();
        let llf = model.log_likelihood(&params);
        let llnull: f64 = counts
            .iter()
            .map(|&c| c as f64 * (c as f64 / n as f64).ln())
            .sum();

        let coefficients =
            WaldTable::from_estimates(params.slice(s![..p]).to_vec(), std_err[..p].to_vec());
        let thresholds =
            WaldTable::from_estimates(params.slice(s![p..]).to_vec(), std_err[p..].to_vec());

        Ok(OrdinalFit::from_tables(coefficients, thresholds, llf, llnull, n))
    }

    /// β at zero and thresholds at the logits of the cumulative category shares.
    fn initial_params(&self, counts: &[usize]) -> Array1<f64> {
        let p = self.x.ncols();
        let n = self.y.len() as f64;

        let mut params = Array1::zeros(p + self.n_categories - 1);
        let mut cumulative = 0.0;
        for j in 0..self.n_categories - 1 {
            cumulative += counts[j] as f64;
            let share = cumulative / n;
            params[p + j] = (share / (1.0 - share)).ln();
        }

        params
    }

    fn optimise(&self, mut params: Array1<f64>) -> Result<Array1<f64>> {
        let mut llf = self.log_likelihood(&params);

        for _ in 0..MAX_ITERATIONS {
            let grad = self.gradient(&params);
            if max_abs(&grad) < TOLERANCE {
                return Ok(params);
            }

            let neg_hessian = -self.hessian(&params);
            let direction = solve_spd(neg_hessian.view(), grad.view()).unwrap_or(grad);

            let mut step = 1.0;
            let accepted = loop {
                let candidate = &params + &(&direction * step);
                if self.ordered(&candidate) {
                    let candidate_llf = self.log_likelihood(&candidate);
                    if candidate_llf.is_finite() && candidate_llf >= llf - 1e-12 {
                        break Some((candidate, candidate_llf));
                    }
                }

                step /= 2.0;
                if step < MIN_STEP {
                    break None;
                }
            };

            let Some((candidate, candidate_llf)) = accepted else {
                break;
            };

            let moved = max_abs(&(&candidate - &params));
            params = candidate;
            llf = candidate_llf;

            if moved < TOLERANCE {
                return Ok(params);
            }
        }

        if max_abs(&self.gradient(&params)) < 1e-4 {
            return Ok(params);
        }

        Err(MlErr::NotConverged {
            iterations: MAX_ITERATIONS,
        })
    }

    fn ordered(&self, params: &Array1<f64>) -> bool {
        let p = self.x.ncols();
        let thresholds = params.slice(s![p..]);
        thresholds.iter().all(|t| t.is_finite())
            && thresholds.iter().zip(thresholds.iter().skip(1)).all(|(a, b)| a < b)
    }

    /// The two cut points bracketing category `c`, infinite at the ends.
    fn bounds(&self, params: &Array1<f64>, c: usize) -> (f64, f64) {
        let p = self.x.ncols();
        let upper = if c + 1 < self.n_categories {
            params[p + c]
        } else {
            f64::INFINITY
        };
        let lower = if c > 0 {
            params[p + c - 1]
        } else {
            f64::NEG_INFINITY
        };
        (upper, lower)
    }

    fn log_likelihood(&self, params: &Array1<f64>) -> f64 {
        let p = self.x.ncols();
        let eta = self.x.dot(&params.slice(s![..p]));

        self.y
            .iter()
            .zip(eta.iter())
            .map(|(&c, &e)| {
                let (upper, lower) = self.bounds(params, c);
                let prob = cdf(upper - e) - cdf(lower - e);
                prob.max(MIN_PROBABILITY).ln()
            })
            .sum()
    }

    fn gradient(&self, params: &Array1<f64>) -> Array1<f64> {
        let p = self.x.ncols();
        let eta = self.x.dot(&params.slice(s![..p]));
        let mut grad = Array1::zeros(params.len());

        for (i, (&c, &e)) in self.y.iter().zip(eta.iter()).enumerate() {
            let (upper, lower) = self.bounds(params, c);
            let (fa, fb) = (density(upper - e), density(lower - e));
            let prob = (cdf(upper - e) - cdf(lower - e)).max(MIN_PROBABILITY);

            let shift = (fa - fb) / prob;
            for j in 0..p {
                grad[j] -= self.x[[i, j]] * shift;
            }
            if c + 1 < self.n_categories {
                grad[p + c] += fa / prob;
            }
            if c > 0 {
                grad[p + c - 1] -= fb / prob;
            }
        }

        grad
    }

    /// Hessian of the log-likelihood by central differences of the analytic gradient.
    fn hessian(&self, params: &Array1<f64>) -> Array2<f64> {
        let k = params.len();
        let mut hessian = Array2::zeros((k, k));

        for j in 0..k {
            let h = 1e-5 * params[j].abs().max(1.0);
            let mut forward = params.clone();
            let mut backward = params.clone();
            forward[j] += h;
            backward[j] -= h;

            let column = (self.gradient(&forward) - self.gradient(&backward)) / (2.0 * h);
            hessian.column_mut(j).assign(&column);
        }

        let transposed = hessian.t().to_owned();
        (hessian + transposed) / 2.0
    }
}

fn max_abs(values: &Array1<f64>) -> f64 {
    values.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

fn cdf(z: f64) -> f64 {
    if z == f64::INFINITY {
        1.0
    } else if z == f64::NEG_INFINITY {
        0.0
    } else {
        sigmoid(z)
    }
}

fn density(z: f64) -> f64 {
    if z.is_infinite() {
        0.0
    } else {
        let f = sigmoid(z);
        f * (1.0 - f)
    }
}
