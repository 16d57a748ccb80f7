use log::warn;

use crate::{MlErr, Result, distributions::chi2_sf, models::pseudo_r2, wald::WaldTable};

/// Fixed effects inverse variance pooling of per site estimates.
///
/// Every coefficient `j` is pooled independently with weights `w_i = 1 / se_ij²`:
/// `β_j = Σ w_i·β_ij / Σ w_i` and `se_j = sqrt(1 / Σ w_i)`. Sites reporting a
/// non positive or non finite standard error get a zero weight.
///
/// # Arguments
/// * `sites` - One `(coef, std_err)` pair per site, all of the same length.
///
/// # Returns
/// The pooled coefficient table.
///
/// # Errors
/// `MlErr::NoInputs` for an empty slice, `MlErr::SizeMismatch` on ragged inputs,
/// `MlErr::DegenerateWeights` when every weight of a coefficient is zero.
pub fn inverse_variance<C, S>(sites: &[(C, S)]) -> Result<WaldTable>
where
    C: AsRef<[f64]>,
    S: AsRef<[f64]>,
{
    let Some((first, _)) = sites.first() else {
        return Err(MlErr::NoInputs);
    };
    let k = first.as_ref().len();

    for (coef, std_err) in sites {
        let (coef, std_err) = (coef.as_ref(), std_err.as_ref());
        if coef.len() != k || std_err.len() != k {
            return Err(MlErr::SizeMismatch {
                a: "site coefficients",
                b: "first site coefficients",
                got: coef.len().max(std_err.len()),
                expected: k,
            });
        }
    }

    let mut pooled = Vec::with_capacity(k);
    let mut pooled_se = Vec::with_capacity(k);

    for j in 0..k {
        let (mut weighted, mut total) = (0.0, 0.0);

        for (coef, std_err) in sites {
            let (coef, std_err) = (coef.as_ref(), std_err.as_ref());
            let se = std_err[j];
            if !(se > 0.0) || !se.is_finite() || !coef[j].is_finite() {
                warn!("ignoring a site for coefficient {j}, standard error {se}");
                continue;
            }

            let w = 1.0 / (se * se);
            weighted += w * coef[j];
            total += w;
        }

        if !(total > 0.0) || !total.is_finite() {
            return Err(MlErr::DegenerateWeights { index: j });
        }

        pooled.push(weighted / total);
        pooled_se.push((1.0 / total).sqrt());
    }

    Ok(WaldTable::from_estimates(pooled, pooled_se))
}

/// Likelihood statistics a site reports next to its coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    pub sample_size: u64,
    pub prsquared: f64,
    pub llf: f64,
    pub llnull: f64,
}

/// Fit statistics of the pooled model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PooledFit {
    pub total_sample_size: u64,
    /// Sample size weighted mean of the sites' pseudo R².
    pub prsquared: f64,
    /// Sum of the sites' log-likelihoods, assuming independent sites.
    pub llf: f64,
    pub llnull: f64,
    pub llr: f64,
    pub llr_pvalue: f64,
}

/// Pools the sites' likelihood statistics.
///
/// # Arguments
/// * `sites` - Every site's summary.
/// * `df` - Degrees of freedom of the likelihood ratio test, the predictor count.
///
/// # Errors
/// `MlErr::NoInputs` for an empty slice.
pub fn pool_fit(sites: &[FitSummary], df: usize) -> Result<PooledFit> {
    if sites.is_empty() {
        return Err(MlErr::NoInputs);
    }

    let total_sample_size: u64 = sites.iter().map(|s| s.sample_size).sum();
    let prsquared = if total_sample_size > 0 {
        sites
            .iter()
            .map(|s| s.prsquared * s.sample_size as f64)
            .sum::<f64>()
            / total_sample_size as f64
    } else {
        pseudo_r2(
            sites.iter().map(|s| s.llf).sum(),
            sites.iter().map(|s| s.llnull).sum(),
        )
    };

    let llf: f64 = sites.iter().map(|s| s.llf).sum();
    let llnull: f64 = sites.iter().map(|s| s.llnull).sum();
    let llr = -2.0 * (llnull - llf);

    Ok(PooledFit {
        total_sample_size,
        prsquared,
        llf,
        llnull,
        llr,
        llr_pvalue: chi2_sf(llr, df),
    })
}
