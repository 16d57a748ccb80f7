use std::collections::HashMap;

use comms::Task;

use super::{LinearTask, LogisticStatsTask, LogisticTask, OrdinalTask, TaskModel};
use crate::error::TaskValidationErr;

/// Builds a fresh model instance.
pub type Factory = fn() -> Box<dyn TaskModel>;

/// Static table from model identifiers to their factories.
#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry of every model this controller ships with.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("LinearRegression", LinearTask::create);
        registry.register("LogisticRegression", LogisticTask::create);
        registry.register("LogisticRegressionStats", LogisticStatsTask::create);
        registry.register("OrdinalLogisticRegression", OrdinalTask::create);
        registry
    }

    /// Adds or replaces the factory of `model`.
    pub fn register(&mut self, model: impl Into<String>, factory: Factory) {
        self.factories.insert(model.into(), factory);
    }

    pub fn resolve(&self, model: &str) -> Option<Factory> {
        self.factories.get(model).copied()
    }

    pub fn contains(&self, model: &str) -> bool {
        self.factories.contains_key(model)
    }

    /// Checks a task list before a run is accepted.
    ///
    /// Every task needs a model known to this registry and a non empty config,
    /// and sequence numbers must count up from 1.
    ///
    /// # Errors
    /// The first `TaskValidationErr` found, in task order.
    pub fn validate_tasks(&self, tasks: &[Task]) -> Result<(), TaskValidationErr> {
        if tasks.is_empty() {
            return Err(TaskValidationErr::NoTasks);
        }

        for (index, task) in tasks.iter().enumerate() {
            if task.model.trim().is_empty() {
                return Err(TaskValidationErr::MissingModel { index });
            }
            if task.config.is_empty() {
                return Err(TaskValidationErr::EmptyConfig { index });
            }

            let expected = index as i64 + 1;
            match task.seq {
                None => return Err(TaskValidationErr::MissingSeq { index }),
                Some(got) if got != expected => {
                    return Err(TaskValidationErr::BadSequence {
                        index,
                        got,
                        expected,
                    });
                }
                Some(_) => {}
            }

            if !self.contains(&task.model) {
                return Err(TaskValidationErr::UnknownModel {
                    index,
                    model: task.model.clone(),
                });
            }
        }

        Ok(())
    }
}
