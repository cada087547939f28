//! Ready queue for instances whose prerequisites have resolved.

use gantry_core::ids::InstanceId;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// An instance waiting for a free execution slot.
#[derive(Debug, Clone)]
pub struct QueuedInstance {
    pub id: InstanceId,
    pub job: String,
    /// Position in plan order; lower runs first.
    pub sequence: usize,
}

impl PartialEq for QueuedInstance {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueuedInstance {}

impl PartialOrd for QueuedInstance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedInstance {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earlier sequence must compare greater
        other
            .sequence
            .cmp(&self.sequence)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Queue manager bounding global and per-job parallelism.
pub struct QueueManager {
    queue: BinaryHeap<QueuedInstance>,
    max_parallel: usize,
    running: usize,
    job_running: HashMap<String, usize>,
    job_limits: HashMap<String, usize>,
}

impl QueueManager {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            queue: BinaryHeap::new(),
            max_parallel: max_parallel.max(1),
            running: 0,
            job_running: HashMap::new(),
            job_limits: HashMap::new(),
        }
    }

    /// Add an instance to the queue.
    pub fn enqueue(&mut self, instance: QueuedInstance) {
        self.queue.push(instance);
    }

    /// Get the next instance that may start now, claiming its slot.
    pub fn dequeue(&mut self) -> Option<QueuedInstance> {
        if self.running >= self.max_parallel {
            return None;
        }

        let mut temp = Vec::new();
        let mut result = None;

        while let Some(instance) = self.queue.pop() {
            if self.can_execute(&instance) {
                self.running += 1;
                *self.job_running.entry(instance.job.clone()).or_insert(0) += 1;
                result = Some(instance);
                break;
            } else {
                temp.push(instance);
            }
        }

        // Put back instances that couldn't be started
        for instance in temp {
            self.queue.push(instance);
        }

        result
    }

    /// Release the slot held by a finished instance.
    pub fn complete(&mut self, job: &str) {
        self.running = self.running.saturating_sub(1);
        if let Some(count) = self.job_running.get_mut(job) {
            *count = count.saturating_sub(1);
        }
    }

    /// Set the concurrency limit for a job's instances.
    pub fn set_job_limit(&mut self, job: impl Into<String>, limit: usize) {
        self.job_limits.insert(job.into(), limit.max(1));
    }

    /// Number of instances waiting for a slot.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether an instance is waiting in the queue.
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.queue.iter().any(|queued| &queued.id == id)
    }

    /// Number of instances holding a slot.
    pub fn running(&self) -> usize {
        self.running
    }

    fn can_execute(&self, instance: &QueuedInstance) -> bool {
        if let Some(&limit) = self.job_limits.get(&instance.job) {
            let current = self.job_running.get(&instance.job).copied().unwrap_or(0);
            if current >= limit {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(job: &str, index: usize, sequence: usize) -> QueuedInstance {
        QueuedInstance {
            id: InstanceId::for_cell(job, index),
            job: job.to_string(),
            sequence,
        }
    }

    #[test]
    fn test_plan_order() {
        let mut queue = QueueManager::new(4);

        queue.enqueue(queued("b", 0, 5));
        queue.enqueue(queued("a", 0, 1));
        queue.enqueue(queued("a", 1, 2));

        assert_eq!(queue.dequeue().unwrap().sequence, 1);
        assert_eq!(queue.dequeue().unwrap().sequence, 2);
        assert_eq!(queue.dequeue().unwrap().sequence, 5);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_global_limit() {
        let mut queue = QueueManager::new(2);
        for i in 0..3 {
            queue.enqueue(queued("build", i, i));
        }

        let first = queue.dequeue().unwrap();
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
        assert_eq!(queue.running(), 2);

        queue.complete(&first.job);
        assert_eq!(queue.dequeue().unwrap().sequence, 2);
    }

    #[test]
    fn test_job_limit() {
        let mut queue = QueueManager::new(8);
        queue.set_job_limit("build", 1);

        queue.enqueue(queued("build", 0, 0));
        queue.enqueue(queued("build", 1, 1));
        queue.enqueue(queued("lint", 0, 2));

        // First build cell starts
        let first = queue.dequeue().unwrap();
        assert_eq!(first.id.as_str(), "build[0]");

        // Second build cell is held back, lint may pass it
        let second = queue.dequeue().unwrap();
        assert_eq!(second.job, "lint");
        assert!(queue.dequeue().is_none());

        // Complete first build cell
        queue.complete("build");

        let third = queue.dequeue().unwrap();
        assert_eq!(third.id.as_str(), "build[1]");
    }
}
