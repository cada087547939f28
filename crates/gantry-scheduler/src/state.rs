//! Per-run status table.
//!
//! The table is owned by the scheduler loop for the duration of one run and
//! only changes through the transition methods below, each of which checks
//! the instance lifecycle `Pending -> Blocked -> Running -> {Succeeded |
//! Failed}` with `Blocked -> Skipped` for instances behind a failed gate.

use crate::dag::ExecutionPlan;
use gantry_core::ids::InstanceId;
use gantry_core::run::{ExecutionOutcome, RunStatus};
use gantry_core::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Status and result of one instance.
#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub status: RunStatus,
    pub outcome: Option<ExecutionOutcome>,
    /// The prerequisite whose failure caused a skip.
    pub skipped_because: Option<InstanceId>,
}

/// Whether an instance may be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every prerequisite succeeded or failed with failure allowed.
    Ready,
    /// At least one prerequisite has not reached a terminal state.
    Waiting,
    /// A required prerequisite failed or was skipped.
    Doomed(InstanceId),
}

#[derive(Debug, Default)]
pub struct RunState {
    records: HashMap<InstanceId, InstanceRecord>,
}

impl RunState {
    /// Every instance of the plan, `Pending`.
    pub fn new(plan: &ExecutionPlan) -> Self {
        let records = plan
            .instances()
            .map(|instance| {
                (
                    instance.id.clone(),
                    InstanceRecord {
                        status: RunStatus::Pending,
                        outcome: None,
                        skipped_because: None,
                    },
                )
            })
            .collect();
        Self { records }
    }

    pub fn status(&self, id: &InstanceId) -> Option<RunStatus> {
        self.records.get(id).map(|r| r.status)
    }

    pub fn record(&self, id: &InstanceId) -> Option<&InstanceRecord> {
        self.records.get(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether every instance reached `Succeeded`, `Failed` or `Skipped`.
    pub fn all_terminal(&self) -> bool {
        self.records.values().all(|r| r.status.is_terminal())
    }

    /// Instances not yet in a terminal state.
    pub fn unresolved(&self) -> Vec<(&InstanceId, RunStatus)> {
        let mut unresolved: Vec<_> = self
            .records
            .iter()
            .filter(|(_, r)| !r.status.is_terminal())
            .map(|(id, r)| (id, r.status))
            .collect();
        unresolved.sort_by(|a, b| a.0.cmp(b.0));
        unresolved
    }

    /// `Pending -> Blocked`: the instance now waits on its prerequisites.
    pub fn block(&mut self, id: &InstanceId) -> Result<()> {
        self.transition(id, RunStatus::Blocked).map(|_| ())
    }

    /// `Blocked -> Running`.
    pub fn start(&mut self, id: &InstanceId) -> Result<()> {
        self.transition(id, RunStatus::Running).map(|_| ())
    }

    /// `Running -> Succeeded | Failed` from the executor's outcome.
    pub fn finish(&mut self, id: &InstanceId, outcome: ExecutionOutcome) -> Result<RunStatus> {
        let next = if outcome.success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let record = self.transition(id, next)?;
        record.outcome = Some(outcome);
        Ok(next)
    }

    /// `Blocked -> Skipped` because `cause` failed without allow-failure.
    pub fn skip(&mut self, id: &InstanceId, cause: InstanceId) -> Result<()> {
        let record = self.transition(id, RunStatus::Skipped)?;
        record.skipped_because = Some(cause);
        Ok(())
    }

    /// Decide whether `id` can run, using only the resolved states of its
    /// declared prerequisites.
    pub fn readiness(&self, plan: &ExecutionPlan, id: &InstanceId) -> Readiness {
        let mut waiting = false;
        for prerequisite in plan.prerequisites(id) {
            match self.status(&prerequisite.id) {
                Some(RunStatus::Succeeded) => {}
                Some(RunStatus::Failed) if prerequisite.allow_failure => {}
                Some(RunStatus::Failed) | Some(RunStatus::Skipped) => {
                    return Readiness::Doomed(prerequisite.id.clone());
                }
                _ => waiting = true,
            }
        }

        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Prerequisites of `id` that ended `Failed` without allow-failure or
    /// `Skipped`, in plan order.
    pub fn blocking_prerequisites(&self, plan: &ExecutionPlan, id: &InstanceId) -> Vec<InstanceId> {
        let blocking: HashSet<InstanceId> = plan
            .prerequisites(id)
            .into_iter()
            .filter(|prerequisite| match self.status(&prerequisite.id) {
                Some(RunStatus::Failed) => !prerequisite.allow_failure,
                Some(RunStatus::Skipped) => true,
                _ => false,
            })
            .map(|prerequisite| prerequisite.id.clone())
            .collect();

        plan.instances()
            .filter(|instance| blocking.contains(&instance.id))
            .map(|instance| instance.id.clone())
            .collect()
    }

    fn transition(&mut self, id: &InstanceId, next: RunStatus) -> Result<&mut InstanceRecord> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("unknown instance `{}`", id)))?;

        if !record.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                instance: id.to_string(),
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        Ok(record)
    }
}
