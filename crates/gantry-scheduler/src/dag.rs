//! Dependency graph over expanded job instances.

use crate::matrix::{ExpansionWarning, MatrixExpander};
use gantry_core::ids::InstanceId;
use gantry_core::instance::JobInstance;
use gantry_core::workflow::WorkflowDefinition;
use gantry_core::{Error, Result};
use indexmap::IndexMap;
use petgraph::Direction;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Cycle detected in job dependencies: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),
    #[error("Job `{job}` needs unknown job `{needed}`")]
    UnknownDependency { job: String, needed: String },
    #[error("Empty workflow")]
    EmptyWorkflow,
}

impl From<DagError> for Error {
    fn from(err: DagError) -> Self {
        match err {
            DagError::CycleDetected(jobs) => Error::CyclicDependency(jobs),
            DagError::UnknownDependency { job, needed } => Error::UnknownJob { job, needed },
            DagError::EmptyWorkflow => Error::Configuration("workflow has no jobs".to_string()),
        }
    }
}

/// How a job's `needs` is turned into instance edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FanOutPolicy {
    /// Every instance of the dependent job waits on every instance of each
    /// prerequisite job: one gate job in front of N matrix builds holds all
    /// N of them, and a matrix in front of a job holds it until all cells end.
    #[default]
    AllInstances,
}

/// Directed acyclic graph of job instances, ready for scheduling.
#[derive(Debug)]
pub struct ExecutionPlan {
    workflow: String,
    graph: DiGraph<JobInstance, ()>,
    index: HashMap<InstanceId, NodeIndex>,
    // Job name to its instances, in declaration order.
    jobs: IndexMap<String, Vec<NodeIndex>>,
    job_limits: HashMap<String, usize>,
    warnings: Vec<ExpansionWarning>,
}

impl ExecutionPlan {
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// All instances in declaration order (job order, then cell order).
    pub fn instances(&self) -> impl Iterator<Item = &JobInstance> {
        self.jobs
            .values()
            .flatten()
            .filter_map(|&idx| self.graph.node_weight(idx))
    }

    pub fn instance(&self, id: &InstanceId) -> Option<&JobInstance> {
        self.index.get(id).and_then(|&idx| self.graph.node_weight(idx))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Instances expanded from the named job.
    pub fn job_instances(&self, job: &str) -> Vec<&JobInstance> {
        self.jobs
            .get(job)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Job names in declaration order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Per-job concurrency limit from `matrix.max_parallel`.
    pub fn job_limit(&self, job: &str) -> Option<usize> {
        self.job_limits.get(job).copied()
    }

    pub fn warnings(&self) -> &[ExpansionWarning] {
        &self.warnings
    }

    /// Instances that must reach a terminal state before `id` may run.
    pub fn prerequisites(&self, id: &InstanceId) -> Vec<&JobInstance> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Instances that list `id` as a prerequisite.
    pub fn dependents(&self, id: &InstanceId) -> Vec<&JobInstance> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Instances with no prerequisites.
    pub fn roots(&self) -> Vec<&JobInstance> {
        self.instances()
            .filter(|instance| self.prerequisites(&instance.id).is_empty())
            .collect()
    }

    /// Get topologically sorted instances.
    pub fn topological_order(&self) -> std::result::Result<Vec<&JobInstance>, DagError> {
        toposort(&self.graph, None)
            .map(|indices| {
                indices
                    .iter()
                    .filter_map(|&idx| self.graph.node_weight(idx))
                    .collect()
            })
            .map_err(|cycle| {
                let name = self
                    .graph
                    .node_weight(cycle.node_id())
                    .map(|n| n.job.clone())
                    .unwrap_or_default();
                DagError::CycleDetected(vec![name])
            })
    }

    /// Instances grouped by longest distance from a root. Every instance's
    /// prerequisites live in earlier waves.
    pub fn waves(&self) -> std::result::Result<Vec<Vec<&JobInstance>>, DagError> {
        let mut level: HashMap<&InstanceId, usize> = HashMap::new();
        for instance in self.topological_order()? {
            let depth = self
                .prerequisites(&instance.id)
                .iter()
                .filter_map(|p| level.get(&p.id))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(&instance.id, depth);
        }

        let depth = level.values().copied().max().map_or(0, |d| d + 1);
        let mut waves: Vec<Vec<&JobInstance>> = vec![Vec::new(); depth];
        // Declaration order inside each wave.
        for instance in self.instances() {
            if let Some(&l) = level.get(&instance.id) {
                waves[l].push(instance);
            }
        }
        Ok(waves)
    }

    fn neighbors(&self, id: &InstanceId, direction: Direction) -> Vec<&JobInstance> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        // petgraph yields neighbors newest-edge first; keep declaration order.
        found.sort();
        found.dedup();
        found
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .collect()
    }
}

/// Builder for constructing execution plans.
pub struct DagBuilder {
    policy: FanOutPolicy,
    strict_matrix: bool,
    expander: MatrixExpander,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self {
            policy: FanOutPolicy::AllInstances,
            strict_matrix: false,
            expander: MatrixExpander::new(),
        }
    }

    /// Treat empty matrix axes as configuration errors instead of warnings.
    pub fn strict_matrix(mut self, strict: bool) -> Self {
        self.strict_matrix = strict;
        self
    }

    pub fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Validate, expand and wire a workflow into an execution plan.
    ///
    /// Performs no execution. Fails before anything runs on configuration
    /// errors or cyclic `needs`.
    pub fn build(&self, workflow: &WorkflowDefinition) -> Result<ExecutionPlan> {
        if workflow.jobs.is_empty() {
            return Err(DagError::EmptyWorkflow.into());
        }
        workflow.validate()?;
        self.check_job_cycles(workflow)?;

        let expansions = self.expander.expand_all(workflow);

        let mut warnings = Vec::new();
        for expansion in &expansions {
            for warning in &expansion.warnings {
                if self.strict_matrix {
                    return Err(warning.clone().into_error());
                }
                warn!(job = %expansion.job, "{}", warning);
                warnings.push(warning.clone());
            }
        }

        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut jobs: IndexMap<String, Vec<NodeIndex>> = IndexMap::new();
        let mut job_limits = HashMap::new();

        // Add all instances as nodes
        for expansion in expansions {
            if let Some(limit) = expansion.max_parallel {
                job_limits.insert(expansion.job.clone(), limit as usize);
            }
            let nodes = jobs.entry(expansion.job.clone()).or_default();
            for instance in expansion.instances {
                let id = instance.id.clone();
                if index.contains_key(&id) {
                    return Err(Error::Configuration(format!(
                        "job `{}` produces instance id `{}` more than once",
                        expansion.job, id
                    )));
                }
                let idx = graph.add_node(instance);
                index.insert(id, idx);
                nodes.push(idx);
            }
        }

        // Add edges for dependencies
        for job in &workflow.jobs {
            let job_nodes = jobs.get(&job.name).cloned().unwrap_or_default();
            let mut seen = HashSet::new();
            for needed in &job.needs {
                if !seen.insert(needed.as_str()) {
                    continue;
                }
                let needed_nodes = jobs.get(needed).ok_or_else(|| DagError::UnknownDependency {
                    job: job.name.clone(),
                    needed: needed.clone(),
                })?;

                match self.policy {
                    FanOutPolicy::AllInstances => {
                        for &from in needed_nodes {
                            for &to in &job_nodes {
                                graph.add_edge(from, to, ());
                            }
                        }
                    }
                }
            }
        }

        let plan = ExecutionPlan {
            workflow: workflow.name.clone(),
            graph,
            index,
            jobs,
            job_limits,
            warnings,
        };

        // Verify no cycles
        plan.topological_order()?;

        debug!(
            workflow = %plan.workflow,
            instances = plan.len(),
            edges = plan.graph.edge_count(),
            "Execution plan built"
        );

        Ok(plan)
    }

    /// Cycle detection on the job-level `needs` relation, so a cycle is
    /// reported even when a job in it expands to zero instances.
    fn check_job_cycles(&self, workflow: &WorkflowDefinition) -> std::result::Result<(), DagError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let nodes: HashMap<&str, NodeIndex> = workflow
            .jobs
            .iter()
            .map(|job| (job.name.as_str(), graph.add_node(job.name.as_str())))
            .collect();

        for job in &workflow.jobs {
            for needed in &job.needs {
                let from = *nodes.get(needed.as_str()).ok_or_else(|| {
                    DagError::UnknownDependency {
                        job: job.name.clone(),
                        needed: needed.clone(),
                    }
                })?;
                graph.update_edge(from, nodes[job.name.as_str()], ());
            }
        }

        for component in tarjan_scc(&graph) {
            let is_cycle = component.len() > 1
                || graph.find_edge(component[0], component[0]).is_some();
            if is_cycle {
                return Err(DagError::CycleDetected(cycle_path(&graph, &component)));
            }
        }

        Ok(())
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk one concrete cycle inside a strongly connected component, starting
/// at its earliest-declared job.
fn cycle_path(graph: &DiGraph<&str, ()>, component: &[NodeIndex]) -> Vec<String> {
    let members: HashSet<NodeIndex> = component.iter().copied().collect();
    let Some(&start) = component.iter().min() else {
        return Vec::new();
    };

    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);
    let mut visited = HashSet::from([start]);

    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph.neighbors(node).filter(|n| members.contains(n)).collect();
        next.sort();
        for succ in next {
            if succ == start {
                let mut path = vec![start];
                let mut cur = node;
                while cur != start {
                    path.push(cur);
                    cur = parent[&cur];
                }
                path.push(start);
                // path is start, node, ..., start reversed in the middle
                let end = path.len() - 1;
                path[1..end].reverse();
                return path.into_iter().map(|n| graph[n].to_string()).collect();
            }
            if visited.insert(succ) {
                parent.insert(succ, node);
                queue.push_back(succ);
            }
        }
    }

    component.iter().map(|&n| graph[n].to_string()).collect()
}
