//! Test helper functions and utilities.

use async_trait::async_trait;
use gantry_core::ids::{InstanceId, RunId, Trigger};
use gantry_core::instance::JobInstance;
use gantry_core::ports::InstanceExecutor;
use gantry_core::run::{ExecutionOutcome, RunReport, RunStatus};
use gantry_core::workflow::WorkflowDefinition;
use gantry_scheduler::{DagBuilder, Scheduler, SchedulerConfig};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Something the scripted executor observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Started(InstanceId),
    Finished(InstanceId),
}

#[derive(Debug, Default)]
struct Tracker {
    events: Vec<DispatchEvent>,
    running: usize,
    max_running: usize,
    job_running: HashMap<String, usize>,
    job_max_running: HashMap<String, usize>,
}

/// Executor double: succeeds unless told otherwise, and records the order
/// and concurrency of dispatches.
#[derive(Default)]
pub struct ScriptedExecutor {
    failing_jobs: HashSet<String>,
    failing_instances: HashSet<InstanceId>,
    delay: Duration,
    tracker: Mutex<Tracker>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every instance of `job` fails.
    pub fn fail_job(mut self, job: &str) -> Self {
        self.failing_jobs.insert(job.to_string());
        self
    }

    /// Only the matrix cell `job[index]` fails.
    pub fn fail_cell(mut self, job: &str, index: usize) -> Self {
        self.failing_instances.insert(InstanceId::for_cell(job, index));
        self
    }

    /// Time each instance spends "running".
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.tracker.lock().unwrap().events.clone()
    }

    /// Instances in the order they were started.
    pub fn started(&self) -> Vec<InstanceId> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DispatchEvent::Started(id) => Some(id),
                DispatchEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Highest number of instances observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.tracker.lock().unwrap().max_running
    }

    /// Highest number of instances of `job` observed running at once.
    pub fn max_job_concurrency(&self, job: &str) -> usize {
        self.tracker
            .lock()
            .unwrap()
            .job_max_running
            .get(job)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl InstanceExecutor for ScriptedExecutor {
    async fn execute(&self, _run_id: RunId, instance: &JobInstance) -> ExecutionOutcome {
        {
            let mut t = self.tracker.lock().unwrap();
            t.events.push(DispatchEvent::Started(instance.id.clone()));
            t.running += 1;
            t.max_running = t.max_running.max(t.running);
            let job_running = {
                let count = t.job_running.entry(instance.job.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let max = t.job_max_running.entry(instance.job.clone()).or_insert(0);
            *max = (*max).max(job_running);
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        {
            let mut t = self.tracker.lock().unwrap();
            t.running -= 1;
            if let Some(count) = t.job_running.get_mut(&instance.job) {
                *count -= 1;
            }
            t.events.push(DispatchEvent::Finished(instance.id.clone()));
        }

        let fails = self.failing_jobs.contains(&instance.job)
            || self.failing_instances.contains(&instance.id);
        if fails {
            ExecutionOutcome::failed("scripted failure", self.delay.as_millis() as u64)
        } else {
            ExecutionOutcome::succeeded(vec![], vec![], self.delay.as_millis() as u64)
        }
    }
}

/// Plan and run a workflow against an executor.
pub async fn run_workflow(
    workflow: &WorkflowDefinition,
    executor: Arc<dyn InstanceExecutor>,
    max_parallel: usize,
) -> anyhow::Result<RunReport> {
    let plan = DagBuilder::new().build(workflow)?;
    let scheduler = Scheduler::new(
        executor,
        SchedulerConfig {
            max_parallel,
            instance_timeout: Some(Duration::from_secs(30)),
        },
    );
    Ok(scheduler.run(&plan, Trigger::from("push")).await?)
}

/// Status of every instance, keyed by id.
pub fn statuses(report: &RunReport) -> HashMap<String, RunStatus> {
    report
        .instances
        .iter()
        .map(|i| (i.id.to_string(), i.status))
        .collect()
}

/// Assert that a future completes within a timeout.
pub async fn assert_completes_within<F, T>(future: F, timeout: Duration) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .expect("future did not complete in time")
}
