//! Main scheduler orchestration.

use crate::dag::ExecutionPlan;
use crate::gate::{Gate, RunMetadata};
use crate::queue::{QueueManager, QueuedInstance};
use crate::state::{Readiness, RunState};

use chrono::Utc;
use futures::FutureExt;
use gantry_core::ids::{InstanceId, RunId, Trigger};
use gantry_core::instance::JobInstance;
use gantry_core::ports::InstanceExecutor;
use gantry_core::run::{ExecutionOutcome, RunReport, RunStatus};
use gantry_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of instances running at once.
    pub max_parallel: usize,
    /// Wall-clock limit for one instance, used when the job sets none.
    pub instance_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            instance_timeout: Some(Duration::from_secs(60 * 60)),
        }
    }
}

/// The scheduler: single coordinator of instance status for a run.
pub struct Scheduler {
    executor: Arc<dyn InstanceExecutor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn InstanceExecutor>, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Execute a plan to completion under a fresh run id.
    pub async fn run(&self, plan: &ExecutionPlan, trigger: Trigger) -> Result<RunReport> {
        self.run_with_id(plan, RunId::new(), trigger).await
    }

    /// Execute a plan to completion.
    ///
    /// Execution failures never surface as `Err`; they end up as `Failed`
    /// instances in the report. `Err` means a scheduler invariant broke.
    pub async fn run_with_id(
        &self,
        plan: &ExecutionPlan,
        run_id: RunId,
        trigger: Trigger,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let span = info_span!("run", run_id = %run_id, workflow = %plan.workflow(), trigger = %trigger);

        async {
            info!(instances = plan.len(), max_parallel = self.config.max_parallel, "Starting run");

            let mut state = RunState::new(plan);
            let mut queue = QueueManager::new(self.config.max_parallel);
            for job in plan.job_names() {
                if let Some(limit) = plan.job_limit(job) {
                    queue.set_job_limit(job, limit);
                }
            }

            let sequence: HashMap<&InstanceId, usize> = plan
                .instances()
                .enumerate()
                .map(|(seq, instance)| (&instance.id, seq))
                .collect();

            // Everything waits on its prerequisites from the start
            for instance in plan.instances() {
                state.block(&instance.id)?;
            }
            let all: Vec<InstanceId> = plan.instances().map(|i| i.id.clone()).collect();
            self.release(plan, &mut state, &mut queue, &sequence, all)?;

            let mut join_set: JoinSet<(InstanceId, ExecutionOutcome)> = JoinSet::new();

            loop {
                while let Some(next) = queue.dequeue() {
                    let Some(instance) = plan.instance(&next.id) else {
                        return Err(Error::Internal(format!("queued unknown instance `{}`", next.id)));
                    };
                    state.start(&instance.id)?;
                    info!(instance = %instance.id, name = %instance.display_name, "Dispatching instance");
                    self.spawn(&mut join_set, run_id, instance.clone());
                }

                // Nothing running and nothing dispatchable: the run is over
                let Some(joined) = join_set.join_next().await else {
                    break;
                };

                let (id, outcome) = joined.map_err(|e| {
                    Error::Internal(format!("instance task did not complete: {}", e))
                })?;

                let job = plan
                    .instance(&id)
                    .map(|i| i.job.clone())
                    .unwrap_or_default();
                queue.complete(&job);

                let status = state.finish(&id, outcome)?;
                match status {
                    RunStatus::Succeeded => info!(instance = %id, "Instance succeeded"),
                    _ => warn!(instance = %id, "Instance failed"),
                }

                let dependents: Vec<InstanceId> =
                    plan.dependents(&id).iter().map(|i| i.id.clone()).collect();
                self.release(plan, &mut state, &mut queue, &sequence, dependents)?;
            }

            let report = Gate::evaluate(
                plan,
                &state,
                RunMetadata {
                    run_id,
                    trigger,
                    started_at,
                },
            )?;

            let counts = report.counts();
            info!(
                status = %report.status,
                succeeded = counts.succeeded,
                failed = counts.failed,
                allowed_failures = counts.allowed_failures,
                skipped = counts.skipped,
                duration_ms = report.duration_ms,
                "Run finished"
            );

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Re-evaluate blocked instances: queue the ready ones, skip the doomed
    /// ones and cascade skips to their own dependents.
    fn release(
        &self,
        plan: &ExecutionPlan,
        state: &mut RunState,
        queue: &mut QueueManager,
        sequence: &HashMap<&InstanceId, usize>,
        candidates: Vec<InstanceId>,
    ) -> Result<()> {
        let mut pending: VecDeque<InstanceId> = candidates.into();

        while let Some(id) = pending.pop_front() {
            if state.status(&id) != Some(RunStatus::Blocked) {
                continue;
            }

            match state.readiness(plan, &id) {
                Readiness::Waiting => {}
                Readiness::Ready => {
                    // Queued instances stay Blocked until dispatched
                    if queue.contains(&id) {
                        continue;
                    }
                    let Some(instance) = plan.instance(&id) else {
                        continue;
                    };
                    queue.enqueue(QueuedInstance {
                        sequence: sequence.get(&id).copied().unwrap_or(usize::MAX),
                        job: instance.job.clone(),
                        id,
                    });
                }
                Readiness::Doomed(cause) => {
                    info!(instance = %id, cause = %cause, "Skipping instance");
                    state.skip(&id, cause)?;
                    pending.extend(plan.dependents(&id).iter().map(|i| i.id.clone()));
                }
            }
        }

        Ok(())
    }

    fn spawn(
        &self,
        join_set: &mut JoinSet<(InstanceId, ExecutionOutcome)>,
        run_id: RunId,
        instance: JobInstance,
    ) {
        let executor = Arc::clone(&self.executor);
        let limit = instance
            .timeout_minutes
            .map(|m| Duration::from_secs(u64::from(m) * 60))
            .or(self.config.instance_timeout);
        let span = info_span!("instance", instance = %instance.id, job = %instance.job);

        join_set.spawn(
            async move {
                let start = Instant::now();
                let execution = AssertUnwindSafe(executor.execute(run_id, &instance)).catch_unwind();

                let timed = match limit {
                    Some(limit) => tokio::time::timeout(limit, execution)
                        .await
                        .map_err(|_| limit),
                    None => Ok(execution.await),
                };

                let outcome = match timed {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(panic)) => {
                        let message = panic_message(panic.as_ref());
                        error!(panic = %message, "Executor panicked");
                        ExecutionOutcome::failed(
                            format!("executor panicked: {}", message),
                            elapsed_ms(start),
                        )
                    }
                    Err(limit) => {
                        let err = Error::InstanceTimeout {
                            instance: instance.id.to_string(),
                            seconds: limit.as_secs(),
                        };
                        warn!(error = %err, "Instance timed out");
                        ExecutionOutcome::failed(err.to_string(), elapsed_ms(start))
                    }
                };

                (instance.id, outcome)
            }
            .instrument(span),
        );
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::DagBuilder;
    use async_trait::async_trait;
    use gantry_core::run::OverallStatus;
    use gantry_core::workflow::{JobDefinition, StepDefinition, WorkflowDefinition};
    use indexmap::IndexMap;
    use std::sync::Mutex;

    /// Fails or panics for configured jobs, sleeps for others.
    struct TestExecutor {
        fail: Vec<&'static str>,
        panic: Vec<&'static str>,
        sleep: Duration,
        started: Mutex<Vec<String>>,
    }

    impl TestExecutor {
        fn new() -> Self {
            Self {
                fail: vec![],
                panic: vec![],
                sleep: Duration::from_millis(1),
                started: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl InstanceExecutor for TestExecutor {
        async fn execute(&self, _run_id: RunId, instance: &JobInstance) -> ExecutionOutcome {
            self.started.lock().unwrap().push(instance.id.to_string());
            if self.panic.contains(&instance.job.as_str()) {
                panic!("boom in {}", instance.job);
            }
            tokio::time::sleep(self.sleep).await;
            if self.fail.contains(&instance.job.as_str()) {
                ExecutionOutcome::failed("exit status 1", 1)
            } else {
                ExecutionOutcome::succeeded(vec![], vec![], 1)
            }
        }
    }

    fn make_job(name: &str, needs: Vec<&str>) -> JobDefinition {
        JobDefinition {
            name: name.to_string(),
            display_name: None,
            needs: needs.iter().map(|s| s.to_string()).collect(),
            matrix: None,
            allow_failure: false,
            env: IndexMap::new(),
            timeout_minutes: None,
            steps: vec![StepDefinition {
                name: "run".to_string(),
                command: Some("true".to_string()),
                args: vec![],
                run: None,
                shell: "sh".to_string(),
                env: IndexMap::new(),
                working_directory: None,
                timeout_minutes: None,
                continue_on_error: false,
            }],
        }
    }

    fn plan(jobs: Vec<JobDefinition>) -> ExecutionPlan {
        let wf = WorkflowDefinition {
            name: "scheduler".to_string(),
            description: None,
            triggers: vec![],
            env: IndexMap::new(),
            jobs,
        };
        DagBuilder::new().build(&wf).unwrap()
    }

    fn status(report: &RunReport, id: &str) -> RunStatus {
        report
            .instance(&InstanceId::for_job(id))
            .map(|i| i.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_failure_skips_transitive_dependents() {
        let plan = plan(vec![
            make_job("a", vec![]),
            make_job("b", vec!["a"]),
            make_job("c", vec!["b"]),
            make_job("side", vec![]),
        ]);
        let mut executor = TestExecutor::new();
        executor.fail = vec!["a"];
        let executor = Arc::new(executor);

        let scheduler = Scheduler::new(executor.clone(), SchedulerConfig::default());
        let report = scheduler.run(&plan, Trigger::from("manual")).await.unwrap();

        assert_eq!(status(&report, "a"), RunStatus::Failed);
        assert_eq!(status(&report, "b"), RunStatus::Skipped);
        assert_eq!(status(&report, "c"), RunStatus::Skipped);
        assert_eq!(status(&report, "side"), RunStatus::Succeeded);
        assert_eq!(report.status, OverallStatus::Failed);

        let started = executor.started.lock().unwrap().clone();
        assert!(!started.contains(&"b".to_string()));
        assert!(!started.contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_panicking_executor_fails_instance() {
        let plan = plan(vec![make_job("a", vec![]), make_job("b", vec![])]);
        let mut executor = TestExecutor::new();
        executor.panic = vec!["a"];

        let scheduler = Scheduler::new(Arc::new(executor), SchedulerConfig::default());
        let report = scheduler.run(&plan, Trigger::from("manual")).await.unwrap();

        let a = report.instance(&InstanceId::for_job("a")).unwrap();
        assert_eq!(a.status, RunStatus::Failed);
        assert!(a.error.as_deref().unwrap().contains("boom in a"));
        assert_eq!(status(&report, "b"), RunStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_instance_timeout_fails_instance() {
        let plan = plan(vec![make_job("slow", vec![])]);
        let mut executor = TestExecutor::new();
        executor.sleep = Duration::from_secs(30);

        let config = SchedulerConfig {
            max_parallel: 1,
            instance_timeout: Some(Duration::from_millis(50)),
        };
        let scheduler = Scheduler::new(Arc::new(executor), config);
        let report = scheduler.run(&plan, Trigger::from("manual")).await.unwrap();

        let slow = report.instance(&InstanceId::for_job("slow")).unwrap();
        assert_eq!(slow.status, RunStatus::Failed);
        assert!(slow.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_plan_succeeds() {
        let mut job = make_job("never", vec![]);
        job.matrix = Some(gantry_core::workflow::MatrixConfig {
            axes: IndexMap::from([("os".to_string(), vec![])]),
            ..Default::default()
        });
        let plan = plan(vec![job]);
        assert!(plan.is_empty());

        let scheduler = Scheduler::new(Arc::new(TestExecutor::new()), SchedulerConfig::default());
        let report = scheduler.run(&plan, Trigger::from("push")).await.unwrap();
        assert!(report.instances.is_empty());
        assert_eq!(report.status, OverallStatus::Succeeded);
        assert_eq!(report.warnings.len(), 1);
    }
}
