use serde::{Deserialize, Serialize};

use crate::{Status, error::RouterErr};

/// The part a site plays within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Coordinator,
    Participant,
}

/// Round bookkeeping of a task. Unknown keys are kept so they round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TaskConfig {
    /// Whether the router sent anything at all for this task.
    pub fn is_empty(&self) -> bool {
        self.total_round.is_none() && self.current_round.is_none() && self.extra.is_empty()
    }
}

/// One stage of a run's pipeline, bound to a task model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    pub model: String,
    #[serde(default)]
    pub config: TaskConfig,
}

/// A run summary as reported by the router for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: u64,
    pub site_uid: String,
    pub role: Role,
    pub status: Status,
    pub batch: u64,
    pub project: u64,
    pub cur_seq: usize,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Run {
    /// Verifies the task sequence points inside the task list.
    ///
    /// # Errors
    /// `RouterErr::InvalidSequence` when `cur_seq` is outside `[1, tasks.len()]`.
    pub fn check(&self) -> Result<(), RouterErr> {
        if self.cur_seq == 0 || self.cur_seq > self.tasks.len() {
            return Err(RouterErr::InvalidSequence {
                run: self.id,
                cur_seq: self.cur_seq,
                tasks: self.tasks.len(),
            });
        }

        Ok(())
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }

    /// The task the run is currently executing.
    pub fn current_task(&self) -> Option<&Task> {
        self.cur_seq.checked_sub(1).and_then(|i| self.tasks.get(i))
    }

    /// The current round of the current task, if the router tracks one.
    pub fn current_round(&self) -> Option<u32> {
        self.current_task()?.config.current_round
    }

    /// True for the very first round of the very first task.
    pub fn is_first_round(&self) -> bool {
        if self.cur_seq != 1 {
            return false;
        }

        match self.current_round() {
            Some(round) => round == 1,
            None => true,
        }
    }

    /// True when the current round of the last task is running.
    ///
    /// A task without round bookkeeping counts as a single round.
    pub fn is_last_round(&self) -> bool {
        if self.cur_seq < self.tasks.len() {
            return false;
        }

        let Some(task) = self.current_task() else {
            return true;
        };

        match (task.config.total_round, task.config.current_round) {
            (Some(total), Some(current)) => current >= total,
            _ => true,
        }
    }

    /// Locates the round whose finalized artifact seeds the current round.
    ///
    /// # Returns
    /// `(seq, round)` of the previous round, or `None` for the first round.
    pub fn previous_seq_and_round(&self) -> Option<(usize, u32)> {
        let round = self.current_round()?;

        if round > 1 {
            return Some((self.cur_seq, round - 1));
        }

        if self.cur_seq <= 1 {
            return None;
        }

        let previous = self.tasks.get(self.cur_seq - 2)?;
        Some((self.cur_seq - 1, previous.config.total_round.unwrap_or(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(total: Option<u32>, current: Option<u32>) -> Task {
        Task {
            seq: None,
            model: "LogisticRegression".into(),
            config: TaskConfig {
                total_round: total,
                current_round: current,
                extra: Default::default(),
            },
        }
    }

    fn run(cur_seq: usize, tasks: Vec<Task>) -> Run {
        Run {
            id: 7,
            site_uid: "site".into(),
            role: Role::Participant,
            status: Status::Standby,
            batch: 1,
            project: 1,
            cur_seq,
            tasks,
        }
    }

    #[test]
    fn sequence_must_point_inside_tasks() {
        assert!(run(1, vec![task(None, None)]).check().is_ok());
        assert!(run(0, vec![task(None, None)]).check().is_err());
        assert!(run(2, vec![task(None, None)]).check().is_err());
    }

    #[test]
    fn first_round_only_on_first_task() {
        assert!(run(1, vec![task(Some(3), Some(1))]).is_first_round());
        assert!(run(1, vec![task(None, None)]).is_first_round());
        assert!(!run(1, vec![task(Some(3), Some(2))]).is_first_round());
        assert!(!run(2, vec![task(Some(1), Some(1)), task(Some(3), Some(1))]).is_first_round());
    }

    #[test]
    fn last_round_needs_last_task_and_exhausted_rounds() {
        assert!(run(1, vec![task(None, None)]).is_last_round());
        assert!(run(1, vec![task(Some(3), Some(3))]).is_last_round());
        assert!(!run(1, vec![task(Some(3), Some(2))]).is_last_round());
        assert!(!run(1, vec![task(Some(1), Some(1)), task(None, None)]).is_last_round());
        assert!(run(2, vec![task(Some(1), Some(1)), task(None, None)]).is_last_round());
    }

    #[test]
    fn previous_round_crosses_task_boundaries() {
        assert_eq!(run(1, vec![task(Some(3), Some(1))]).previous_seq_and_round(), None);
        assert_eq!(
            run(1, vec![task(Some(3), Some(3))]).previous_seq_and_round(),
            Some((1, 2))
        );
        assert_eq!(
            run(2, vec![task(Some(4), Some(4)), task(Some(2), Some(1))]).previous_seq_and_round(),
            Some((1, 4))
        );
    }

    #[test]
    fn decodes_router_summary() {
        let json = r#"{
            "id": 12, "site_uid": "a1", "role": "coordinator", "status": "Pending Success",
            "batch": 3, "project": 9, "cur_seq": 1,
            "tasks": [{"seq": 1, "model": "LinearRegression",
                       "config": {"total_round": 2, "current_round": 1, "lr": 0.1}}]
        }"#;

        let run: Run = serde_json::from_str(json).unwrap();
        assert_eq!(run.status, Status::PendingSuccess);
        assert!(run.is_coordinator());
        assert_eq!(run.current_round(), Some(1));
        assert_eq!(run.tasks[0].config.extra["lr"], 0.1);
    }
}
