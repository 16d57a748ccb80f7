use async_trait::async_trait;
use machine_learning::{
    aggregation::WeightedAverage,
    dataset::{SPLIT_SEED, Standardizer, TEST_RATIO},
    metrics::RegressionMetrics,
    models::LinearRegression,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{TaskContext, TaskModel};
use crate::{Result, error::ControllerErr};

/// Mid-artifact and artifact of the federated linear regression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearArtifact {
    pub sample_size: u64,
    #[serde(rename = "coef_")]
    pub coef: Vec<f64>,
    #[serde(rename = "intercept_")]
    pub intercept: f64,
    #[serde(flatten)]
    pub metrics: RegressionMetrics,
}

struct Prepared {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
    sample_size: u64,
}

/// Ordinary least squares per site, averaged by sample size.
#[derive(Default)]
pub struct LinearTask {
    prepared: Option<Prepared>,
    model: Option<LinearRegression>,
}

impl LinearTask {
    pub fn create() -> Box<dyn TaskModel> {
        Box::new(Self::default())
    }

    fn artifact(&self, model: &LinearRegression, sample_size: u64) -> Result<LinearArtifact> {
        let prepared = self.prepared.as_ref().ok_or(ControllerErr::NotPrepared)?;
        let predicted = model.predict(prepared.x_test.view());

        Ok(LinearArtifact {
            sample_size,
            coef: model.coef().to_vec(),
            intercept: model.intercept(),
            metrics: RegressionMetrics::compute(prepared.y_test.view(), predicted.view()),
        })
    }
}

#[async_trait]
impl TaskModel for LinearTask {
    async fn prepare_data(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.prepared = None;

        let dataset = ctx.load_dataset()?;
        let (train, test) = dataset.split(TEST_RATIO, SPLIT_SEED);
        let scaler = Standardizer::fit(train.x());

        if let Some(previous) = ctx.read_previous_artifact::<LinearArtifact>()? {
            if previous.coef.len() == dataset.n_features() {
                self.model = Some(LinearRegression::from_parts(
                    Array1::from(previous.coef),
                    previous.intercept,
                ));
            } else {
                ctx.log.warn("previous artifact does not match the feature count");
            }
        }

        self.prepared = Some(Prepared {
            x_train: scaler.transform(train.x()),
            y_train: train.y().to_owned(),
            x_test: scaler.transform(test.x()),
            y_test: test.y().to_owned(),
            sample_size: dataset.len() as u64,
        });
        Ok(())
    }

    async fn training(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        if self.prepared.is_none() {
            self.prepare_data(ctx).await?;
        }
        ctx.log.info("starting training");

        let prepared = self.prepared.as_ref().ok_or(ControllerErr::NotPrepared)?;
        let model = LinearRegression::fit(prepared.x_train.view(), prepared.y_train.view())?;
        let artifact = self.artifact(&model, prepared.sample_size)?;
        ctx.log.info(format!(
            "training complete, r2 {:.4}",
            artifact.metrics.metric_r2
        ));

        self.model = Some(model);
        ctx.save_mid_artifact(&artifact)?;
        Ok(())
    }

    async fn do_aggregate(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        if self.prepared.is_none() {
            self.prepare_data(ctx).await?;
        }

        let mids: Vec<LinearArtifact> = ctx.read_mid_artifacts()?;
        let mut average = WeightedAverage::new();
        for mid in &mids {
            let mut params = mid.coef.clone();
            params.push(mid.intercept);
            average.add(mid.sample_size, &params)?;
        }
        let total = average.total();
        let mut params = average.finish()?;

        let intercept = params.pop().ok_or(ControllerErr::NoResults("intercept"))?;
        let model = LinearRegression::from_parts(Array1::from(params), intercept);

        let artifact = self.artifact(&model, total)?;
        ctx.log.info(format!(
            "aggregated {} site(s) over {total} samples, r2 {:.4}",
            mids.len(),
            artifact.metrics.metric_r2
        ));

        self.model = Some(model);
        ctx.save_artifact(&artifact)?;
        ctx.upload_artifact().await
    }
}
