use async_trait::async_trait;
use machine_learning::{
    aggregation::{FitSummary, inverse_variance, pool_fit},
    dataset::{Dataset, SPLIT_SEED, TEST_RATIO},
    models::{InferenceFit, LogitInference, binary_labels},
};
use serde::{Deserialize, Serialize};

use super::{TaskContext, TaskModel};
use crate::{Result, error::ControllerErr};

/// A site's inference logistic fit, intercept first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticStatsArtifact {
    /// Rows of the training split.
    pub sample_size: u64,
    #[serde(flatten)]
    pub fit: InferenceFit,
}

/// The meta-analysis across sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticStatsAggregate {
    pub total_sample_size: u64,
    pub n_sites: usize,
    #[serde(flatten)]
    pub fit: InferenceFit,
}

/// Maximum likelihood logistic regression with Wald inference, pooled by
/// inverse variance meta-analysis.
#[derive(Default)]
pub struct LogisticStatsTask {
    train: Option<Dataset>,
}

impl LogisticStatsTask {
    pub fn create() -> Box<dyn TaskModel> {
        Box::new(Self::default())
    }
}

#[async_trait]
impl TaskModel for LogisticStatsTask {
    async fn prepare_data(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.train = None;

        let dataset = ctx.load_dataset()?;
        ctx.warn_small_sample(dataset.len());

        let labels = binary_labels(dataset.y())?;
        let dataset = dataset.with_labels(labels)?;
        let (train, test) = dataset.split(TEST_RATIO, SPLIT_SEED);
        ctx.log.debug(format!(
            "train {} rows, test {} rows, {} predictors",
            train.len(),
            test.len(),
            train.n_features()
        ));

        if let Some(previous) = ctx.read_previous_artifact::<LogisticStatsAggregate>()? {
            ctx.log.debug(format!(
                "previous round pooled {} site(s)",
                previous.n_sites
            ));
        }

        self.train = Some(train);
        Ok(())
    }

    async fn training(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        if self.train.is_none() {
            self.prepare_data(ctx).await?;
        }
        let train = self.train.as_ref().ok_or(ControllerErr::NotPrepared)?;
        ctx.log.info("starting logistic regression analysis");

        let fit = LogitInference::fit(train.x(), train.y())?;
        ctx.log
            .info(format!("model fitted, pseudo R² {:.4}", fit.prsquared));
        ctx.log.info(format!("odds ratios {:?}", fit.table.odds_ratios));

        ctx.save_mid_artifact(&LogisticStatsArtifact {
            sample_size: train.len() as u64,
            fit,
        })?;
        Ok(())
    }

    async fn do_aggregate(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        let mids: Vec<LogisticStatsArtifact> = ctx.read_mid_artifacts()?;

        let sites: Vec<(&[f64], &[f64])> = mids
            .iter()
            .map(|m| (m.fit.table.coef.as_slice(), m.fit.table.std_err.as_slice()))
            .collect();
        let table = inverse_variance(&sites)?;

        let summaries: Vec<FitSummary> = mids
            .iter()
            .map(|m| FitSummary {
                sample_size: m.sample_size,
                prsquared: m.fit.prsquared,
                llf: m.fit.llf,
                llnull: m.fit.llnull,
            })
            .collect();
        let pooled = pool_fit(&summaries, table.len().saturating_sub(1))?;

        ctx.log.info(format!(
            "pooled {} site(s) over {} samples",
            mids.len(),
            pooled.total_sample_size
        ));
        ctx.log.info(format!("pooled coefficients {:?}", table.coef));
        ctx.log.info(format!("pooled p-values {:?}", table.p_values));
        ctx.log.info(format!(
            "pooled pseudo R² {:.4}, LLR p-value {:.6}",
            pooled.prsquared, pooled.llr_pvalue
        ));

        let aggregate = LogisticStatsAggregate {
            total_sample_size: pooled.total_sample_size,
            n_sites: mids.len(),
            fit: InferenceFit {
                table,
                prsquared: pooled.prsquared,
                llr: pooled.llr,
                llr_pvalue: pooled.llr_pvalue,
                llf: pooled.llf,
                llnull: pooled.llnull,
            },
        };

        ctx.save_artifact(&aggregate)?;
        ctx.upload_artifact().await
    }
}
