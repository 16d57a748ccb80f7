use std::collections::BTreeMap;

use async_trait::async_trait;
use machine_learning::{
    aggregation::{FitSummary, inverse_variance, pool_fit},
    dataset::{Dataset, SPLIT_SEED, TEST_RATIO},
    models::{OrdinalFit, OrdinalLogit, OrdinalTarget},
    wald::WaldTable,
};
use serde::{Deserialize, Serialize};

use super::{TaskContext, TaskModel};
use crate::{Result, error::ControllerErr};

/// A site's proportional odds fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalArtifact {
    /// Rows of the training split.
    pub sample_size: u64,
    pub n_categories: usize,
    /// Observations per original category value.
    pub category_counts: BTreeMap<String, usize>,
    #[serde(flatten)]
    pub fit: OrdinalFit,
}

/// The meta-analysis across sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalAggregate {
    pub total_sample_size: u64,
    pub n_sites: usize,
    pub n_categories: usize,
    #[serde(flatten)]
    pub fit: OrdinalFit,
}

struct Prepared {
    train: Dataset,
    n_categories: usize,
    category_counts: BTreeMap<String, usize>,
}

/// Ordinal logistic regression with at least three ordered outcome categories.
#[derive(Default)]
pub struct OrdinalTask {
    prepared: Option<Prepared>,
}

impl OrdinalTask {
    pub fn create() -> Box<dyn TaskModel> {
        Box::new(Self::default())
    }
}

#[async_trait]
impl TaskModel for OrdinalTask {
    async fn prepare_data(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.prepared = None;

        let dataset = ctx.load_dataset()?;
        ctx.warn_small_sample(dataset.len());

        let target = OrdinalTarget::encode(dataset.y())?;
        let category_counts: BTreeMap<String, usize> = target
            .levels()
            .iter()
            .zip(target.counts())
            .map(|(level, &count)| (level.to_string(), count))
            .collect();
        ctx.log.info(format!(
            "{} ordered categories, counts {category_counts:?}",
            target.n_categories()
        ));

        let dataset = dataset.with_labels(target.codes().to_owned())?;
        let (train, test) = dataset.split(TEST_RATIO, SPLIT_SEED);
        ctx.log.debug(format!(
            "train {} rows, test {} rows",
            train.len(),
            test.len()
        ));

        if let Some(previous) = ctx.read_previous_artifact::<OrdinalAggregate>()? {
            ctx.log.debug(format!(
                "previous round pooled {} site(s)",
                previous.n_sites
            ));
        }

        self.prepared = Some(Prepared {
            train,
            n_categories: target.n_categories(),
            category_counts,
        });
        Ok(())
    }

    async fn training(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        if self.prepared.is_none() {
            self.prepare_data(ctx).await?;
        }
        let prepared = self.prepared.as_ref().ok_or(ControllerErr::NotPrepared)?;
        ctx.log.info(format!(
            "starting ordinal logistic regression with {} predictors",
            prepared.train.n_features()
        ));

        let fit = OrdinalLogit::fit(
            prepared.train.x(),
            prepared.train.y(),
            prepared.n_categories,
        )?;
        ctx.log
            .info(format!("model fitted, pseudo R² {:.4}", fit.prsquared));

        ctx.save_mid_artifact(&OrdinalArtifact {
            sample_size: prepared.train.len() as u64,
            n_categories: prepared.n_categories,
            category_counts: prepared.category_counts.clone(),
            fit,
        })?;
        Ok(())
    }

    async fn do_aggregate(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        let mids: Vec<OrdinalArtifact> = ctx.read_mid_artifacts()?;

        let sites: Vec<(&[f64], &[f64])> = mids
            .iter()
            .map(|m| {
                let table = &m.fit.coefficients;
                (table.coef.as_slice(), table.std_err.as_slice())
            })
            .collect();
        let coefficients = inverse_variance(&sites)?;

        let n_categories = mids
            .first()
            .map(|m| m.n_categories)
            .ok_or(ControllerErr::NoResults("mid-artifacts"))?;
        let thresholds = if mids.iter().all(|m| m.n_categories == n_categories) {
            let sites: Vec<(&[f64], &[f64])> = mids
                .iter()
                .map(|m| (m.fit.thresholds.as_slice(), m.fit.threshold_std_err.as_slice()))
                .collect();
            inverse_variance(&sites)?
        } else {
            ctx.log
                .warn("sites disagree on the category count, thresholds are not pooled");
            WaldTable::default()
        };

        let summaries: Vec<FitSummary> = mids
            .iter()
            .map(|m| FitSummary {
                sample_size: m.sample_size,
                prsquared: m.fit.prsquared,
                llf: m.fit.llf,
                llnull: m.fit.llnull,
            })
            .collect();
        let pooled = pool_fit(&summaries, coefficients.len())?;

        let mut fit = OrdinalFit::from_tables(
            coefficients,
            thresholds,
            pooled.llf,
            pooled.llnull,
            pooled.total_sample_size as usize,
        );
        fit.prsquared = pooled.prsquared;

        ctx.log.info(format!(
            "pooled {} site(s) over {} samples",
            mids.len(),
            pooled.total_sample_size
        ));
        ctx.log
            .info(format!("pooled odds ratios {:?}", fit.coefficients.odds_ratios));
        ctx.log.info(format!(
            "pooled pseudo R² {:.4}, LLR p-value {:.6}",
            fit.prsquared, fit.llr_pvalue
        ));

        ctx.save_artifact(&OrdinalAggregate {
            total_sample_size: pooled.total_sample_size,
            n_sites: mids.len(),
            n_categories,
            fit,
        })?;
        ctx.upload_artifact().await
    }
}
