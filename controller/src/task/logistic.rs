use async_trait::async_trait;
use machine_learning::{
    aggregation::WeightedAverage,
    dataset::{Dataset, SPLIT_SEED, Standardizer, TEST_RATIO},
    metrics::ClassificationMetrics,
    models::{LogisticRegression, binary_labels},
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::{TaskContext, TaskModel};
use crate::{Result, error::ControllerErr};

/// Mid-artifact and artifact of the federated logistic regression.
///
/// Coefficients are kept one row per class to stay compatible with consumers
/// of the router's artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticArtifact {
    pub sample_size: u64,
    #[serde(rename = "coef_")]
    pub coef: Vec<Vec<f64>>,
    #[serde(rename = "intercept_")]
    pub intercept: Vec<f64>,
    #[serde(flatten)]
    pub metrics: ClassificationMetrics,
}

impl LogisticArtifact {
    fn model(&self) -> Result<LogisticRegression> {
        let (Some(coef), Some(&intercept)) = (self.coef.first(), self.intercept.first()) else {
            return Err(ControllerErr::NoResults("logistic coefficients"));
        };

        Ok(LogisticRegression::from_parts(
            Array1::from(coef.clone()),
            intercept,
        ))
    }

    /// Coefficients followed by the intercept.
    fn params(&self) -> Result<Vec<f64>> {
        let model = self.model()?;
        let mut params = model.coef().to_vec();
        params.push(model.intercept());
        Ok(params)
    }
}

struct Prepared {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    y_test: Array1<f64>,
    sample_size: u64,
}

/// Binary logistic regression averaged across sites, one local Newton step per round.
#[derive(Default)]
pub struct LogisticTask {
    prepared: Option<Prepared>,
    model: Option<LogisticRegression>,
}

impl LogisticTask {
    pub fn create() -> Box<dyn TaskModel> {
        Box::new(Self::default())
    }

    fn artifact(&self, model: &LogisticRegression, sample_size: u64) -> Result<LogisticArtifact> {
        let prepared = self.prepared.as_ref().ok_or(ControllerErr::NotPrepared)?;
        let predicted = model.predict(prepared.x_test.view());

        Ok(LogisticArtifact {
            sample_size,
            coef: vec![model.coef().to_vec()],
            intercept: vec![model.intercept()],
            metrics: ClassificationMetrics::compute(prepared.y_test.view(), predicted.view()),
        })
    }

    async fn ensure_prepared(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        if self.prepared.is_none() {
            self.prepare_data(ctx).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskModel for LogisticTask {
    async fn prepare_data(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.prepared = None;

        let dataset = ctx.load_dataset()?;
        let labels = binary_labels(dataset.y())?;
        let dataset: Dataset = dataset.with_labels(labels)?;

        let (train, test) = dataset.split(TEST_RATIO, SPLIT_SEED);
        let scaler = Standardizer::fit(train.x());

        let mut model = LogisticRegression::new(dataset.n_features());
        if let Some(previous) = ctx.read_previous_artifact::<LogisticArtifact>()? {
            let warm = previous.model()?;
            if warm.coef().len() == dataset.n_features() {
                ctx.log.debug("warm starting from the previous round");
                model = warm;
            } else {
                ctx.log.warn(format!(
                    "previous artifact has {} coefficients for {} features, starting fresh",
                    warm.coef().len(),
                    dataset.n_features()
                ));
            }
        }

        ctx.log.debug(format!(
            "train {} rows, test {} rows",
            train.len(),
            test.len()
        ));

        self.prepared = Some(Prepared {
            x_train: scaler.transform(train.x()),
            y_train: train.y().to_owned(),
            x_test: scaler.transform(test.x()),
            y_test: test.y().to_owned(),
            sample_size: dataset.len() as u64,
        });
        self.model = Some(model);
        Ok(())
    }

    async fn training(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.ensure_prepared(ctx).await?;
        ctx.log.info("starting training");

        let prepared = self.prepared.as_ref().ok_or(ControllerErr::NotPrepared)?;
        let mut model = self.model.take().ok_or(ControllerErr::NotPrepared)?;
        model.step(prepared.x_train.view(), prepared.y_train.view())?;
        let sample_size = prepared.sample_size;

        let artifact = self.artifact(&model, sample_size)?;
        self.model = Some(model);
        ctx.log.info(format!(
            "training complete, accuracy {:.4}",
            artifact.metrics.metric_acc
        ));

        ctx.save_mid_artifact(&artifact)?;
        Ok(())
    }

    async fn do_aggregate(&mut self, ctx: &TaskContext<'_>) -> Result<()> {
        self.ensure_prepared(ctx).await?;

        let mids: Vec<LogisticArtifact> = ctx.read_mid_artifacts()?;
        let mut average = WeightedAverage::new();
        for mid in &mids {
            average.add(mid.sample_size, &mid.params()?)?;
        }
        let total = average.total();
        let mut params = average.finish()?;

        let intercept = params.pop().ok_or(ControllerErr::NoResults("intercept"))?;
        let model = LogisticRegression::from_parts(Array1::from(params), intercept);

        let artifact = self.artifact(&model, total)?;
        ctx.log.info(format!(
            "aggregated {} site(s) over {total} samples, accuracy {:.4}",
            mids.len(),
            artifact.metrics.metric_acc
        ));

        self.model = Some(model);
        ctx.save_artifact(&artifact)?;
        ctx.upload_artifact().await
    }
}
