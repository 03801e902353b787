//! Work-stealing parallel task dispatcher.
//!
//! Ported from `parallel_executor.py`: a priority work queue gated by
//! feature dependencies, an agent pool, and a steal operation that always
//! takes the *lowest*-priority ready work off the queue (the busiest
//! agent gives up its least important item, rather than its most
//! important).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::domain_types::{AgentId, FeatureId, TaskId};
use crate::persistence;

/// Scheduling priority for a task; ordered so `Critical` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    /// Highest priority; scheduled ahead of all others.
    Critical,
    /// Elevated priority.
    High,
    /// Default priority.
    Normal,
    /// Lowest priority; first to be stolen.
    Low,
}

/// Lifecycle status of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Claimed and running on an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Status of an agent in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Not currently assigned work.
    Idle,
    /// Currently executing a task.
    Busy,
    /// Idle and actively requesting stolen work.
    Stealing,
    /// Permanently removed from the pool.
    Stopped,
}

/// A unit of work submitted to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id.
    pub id: TaskId,
    /// Scheduling priority.
    pub priority: TaskPriority,
    /// Feature dependencies that must be `Complete` before this task is
    /// ready to run.
    pub depends_on: Vec<FeatureId>,
    /// Creation order, used to break priority ties FIFO.
    pub created_at: u64,
    /// Current status.
    pub status: TaskStatus,
    /// Opaque task payload.
    pub payload: serde_json::Value,
}

impl Task {
    /// True if every dependency in `completed` is satisfied.
    #[must_use]
    pub fn is_ready(&self, completed: &std::collections::HashSet<FeatureId>) -> bool {
        self.depends_on.iter().all(|dep| completed.contains(dep))
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Task {}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.created_at.cmp(&other.created_at))
    }
}

/// The outcome of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResult {
    /// The task that finished.
    pub task_id: TaskId,
    /// Which agent ran it.
    pub agent_id: AgentId,
    /// Whether it succeeded.
    pub success: bool,
    /// How long it ran, in milliseconds.
    pub duration_ms: u64,
    /// Opaque result payload.
    pub output: serde_json::Value,
}

/// An agent in the pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique id.
    pub id: AgentId,
    /// Current status.
    pub status: AgentStatus,
    /// The task currently assigned, if any.
    pub current_task: Option<TaskId>,
    #[serde(skip, default)]
    assigned_at: Option<std::time::Instant>,
}

impl Agent {
    /// Builds a new idle agent.
    #[must_use]
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            status: AgentStatus::Idle,
            current_task: None,
            assigned_at: None,
        }
    }

    /// Assigns `task_id`, marking the agent busy.
    pub fn assign_task(&mut self, task_id: TaskId) {
        self.current_task = Some(task_id);
        self.status = AgentStatus::Busy;
        self.assigned_at = Some(std::time::Instant::now());
    }

    /// Completes the current task, returning its elapsed duration.
    pub fn complete_task(&mut self) -> u64 {
        let duration_ms = self
            .assigned_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.current_task = None;
        self.status = AgentStatus::Idle;
        self.assigned_at = None;
        duration_ms
    }

    /// Marks the agent as actively requesting stolen work.
    pub fn start_stealing(&mut self) {
        if self.status == AgentStatus::Idle {
            self.status = AgentStatus::Stealing;
        }
    }

    /// Stops requesting stolen work, returning to idle.
    pub fn stop_stealing(&mut self) {
        if self.status == AgentStatus::Stealing {
            self.status = AgentStatus::Idle;
        }
    }

    /// Permanently removes the agent from active scheduling.
    pub fn stop(&mut self) {
        self.status = AgentStatus::Stopped;
    }
}

/// A priority queue of pending tasks.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WorkQueue {
    tasks: Vec<Task>,
}

impl WorkQueue {
    /// Builds an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `task`.
    pub fn enqueue(&mut self, task: Task) {
        self.tasks.push(task);
    }

    /// Removes and returns the highest-priority ready task, if any.
    pub fn dequeue(&mut self, completed: &std::collections::HashSet<FeatureId>) -> Option<Task> {
        let idx = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_ready(completed))
            .min_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(i, _)| i)?;
        Some(self.tasks.remove(idx))
    }

    /// The highest-priority ready task without removing it.
    #[must_use]
    pub fn peek(&self, completed: &std::collections::HashSet<FeatureId>) -> Option<&Task> {
        self.tasks.iter().filter(|t| t.is_ready(completed)).min()
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True if the queue holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Removes and returns up to `count` of the *lowest*-priority tasks,
    /// sorted ascending by priority so the stolen batch starts with the
    /// least important work, matching `WorkQueue.steal` in the original
    /// implementation (sort the full heap ascending, take the tail).
    pub fn steal(&mut self, count: usize) -> Vec<Task> {
        let mut indexed: Vec<(usize, &Task)> = self.tasks.iter().enumerate().collect();
        indexed.sort_by(|(_, a), (_, b)| a.cmp(b));
        let take = indexed.len().min(count);
        let mut stolen_indices: Vec<usize> = indexed[indexed.len() - take..]
            .iter()
            .map(|(i, _)| *i)
            .collect();
        stolen_indices.sort_unstable_by(|a, b| b.cmp(a));

        let mut stolen = Vec::with_capacity(take);
        for idx in stolen_indices {
            stolen.push(self.tasks.remove(idx));
        }
        stolen.reverse();
        stolen
    }
}

/// Errors raised by the dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The named agent is not registered.
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// The named task is not tracked.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// The named agent has no task currently assigned.
    #[error("agent {0} has no current task")]
    NoCurrentTask(AgentId),

    /// Persistence failure saving/loading dispatcher state.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

#[derive(Debug, Serialize, Deserialize)]
struct DispatchSnapshot {
    queue: WorkQueue,
    agents: Vec<Agent>,
    completed_features: Vec<FeatureId>,
    completed_count: u64,
}

/// Coordinates a `WorkQueue` against a pool of agents.
///
/// A task that finishes `Failed` never unblocks dependents: feature
/// completion is driven externally (via the dependency engine), not by
/// task status, so a failed task simply never gets marked complete.
#[derive(Debug, Default)]
pub struct Dispatcher {
    queue: WorkQueue,
    agents: HashMap<AgentId, Agent>,
    completed_features: std::collections::HashSet<FeatureId>,
    completed_count: u64,
}

impl Dispatcher {
    /// Builds an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `agent`.
    pub fn register_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.id, agent);
    }

    /// Submits `task` for scheduling.
    pub fn submit(&mut self, task: Task) {
        self.queue.enqueue(task);
    }

    /// Records that `feature` has completed, unblocking dependent tasks.
    pub fn mark_feature_complete(&mut self, feature: FeatureId) {
        self.completed_features.insert(feature);
    }

    /// Number of tasks still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Total tasks completed (successfully or not) since construction.
    #[must_use]
    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    /// Assigns ready work to every idle agent, up to one task each.
    pub fn assign_tasks(&mut self) -> Result<Vec<(AgentId, TaskId)>, DispatchError> {
        let mut assignments = Vec::new();
        let idle_ids: Vec<AgentId> = self
            .agents
            .values()
            .filter(|a| a.status == AgentStatus::Idle)
            .map(|a| a.id)
            .collect();

        for agent_id in idle_ids {
            let Some(task) = self.queue.dequeue(&self.completed_features) else {
                break;
            };
            let task_id = task.id;
            self.agents
                .get_mut(&agent_id)
                .ok_or(DispatchError::UnknownAgent(agent_id))?
                .assign_task(task_id);
            assignments.push((agent_id, task_id));
        }
        Ok(assignments)
    }

    /// Marks `agent_id`'s current task complete, recording `success`.
    pub fn complete_task(
        &mut self,
        agent_id: AgentId,
        success: bool,
        output: serde_json::Value,
    ) -> Result<WorkResult, DispatchError> {
        let agent = self
            .agents
            .get_mut(&agent_id)
            .ok_or(DispatchError::UnknownAgent(agent_id))?;
        let task_id = agent
            .current_task
            .ok_or(DispatchError::NoCurrentTask(agent_id))?;
        let duration_ms = agent.complete_task();
        self.completed_count += 1;

        Ok(WorkResult {
            task_id,
            agent_id,
            success,
            duration_ms,
            output,
        })
    }

    /// Finds an idle agent requesting to steal work and gives it up to
    /// `count` of the queue's lowest-priority tasks.
    pub fn steal_work_for(&mut self, agent_id: AgentId, count: usize) -> Result<Vec<Task>, DispatchError> {
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or(DispatchError::UnknownAgent(agent_id))?;
        if agent.status != AgentStatus::Stealing && agent.status != AgentStatus::Idle {
            return Ok(Vec::new());
        }
        Ok(self.queue.steal(count))
    }

    /// A snapshot of pending/running/completed counts for dashboards.
    #[must_use]
    pub fn get_status(&self) -> DispatcherStatus {
        DispatcherStatus {
            pending: self.queue.len(),
            running: self
                .agents
                .values()
                .filter(|a| a.status == AgentStatus::Busy)
                .count(),
            idle_agents: self
                .agents
                .values()
                .filter(|a| a.status == AgentStatus::Idle)
                .count(),
            completed: self.completed_count,
        }
    }

    /// Stops every registered agent.
    pub fn shutdown(&mut self) {
        for agent in self.agents.values_mut() {
            agent.stop();
        }
    }

    /// Saves queue, agent, and completion state to `path`.
    pub fn save(&self, path: &Path) -> Result<(), DispatchError> {
        let snapshot = DispatchSnapshot {
            queue: WorkQueue {
                tasks: self.queue.tasks.clone(),
            },
            agents: self.agents.values().cloned().collect(),
            completed_features: self.completed_features.iter().cloned().collect(),
            completed_count: self.completed_count,
        };
        persistence::save_json(path, &snapshot)?;
        Ok(())
    }

    /// Loads queue, agent, and completion state from `path`.
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let snapshot: DispatchSnapshot = persistence::load_json(path)?;
        Ok(Self {
            queue: snapshot.queue,
            agents: snapshot.agents.into_iter().map(|a| (a.id, a)).collect(),
            completed_features: snapshot.completed_features.into_iter().collect(),
            completed_count: snapshot.completed_count,
        })
    }
}

/// A point-in-time view of dispatcher load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStatus {
    /// Tasks still waiting in the queue.
    pub pending: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Agents with no assigned task.
    pub idle_agents: usize,
    /// Total tasks completed since construction.
    pub completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: TaskPriority, created_at: u64) -> Task {
        Task {
            id: TaskId::generate(),
            priority,
            depends_on: Vec::new(),
            created_at,
            status: TaskStatus::Pending,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn dequeue_returns_highest_priority_first() {
        let mut queue = WorkQueue::new();
        queue.enqueue(task(TaskPriority::Low, 0));
        queue.enqueue(task(TaskPriority::Critical, 1));
        queue.enqueue(task(TaskPriority::Normal, 2));

        let completed = std::collections::HashSet::new();
        assert_eq!(queue.dequeue(&completed).unwrap().priority, TaskPriority::Critical);
        assert_eq!(queue.dequeue(&completed).unwrap().priority, TaskPriority::Normal);
        assert_eq!(queue.dequeue(&completed).unwrap().priority, TaskPriority::Low);
    }

    #[test]
    fn dependency_gated_dequeue_skips_unready_tasks() {
        let mut queue = WorkQueue::new();
        let gated_feature = FeatureId::try_new("needs-auth".to_string()).unwrap();
        let mut gated = task(TaskPriority::Critical, 0);
        gated.depends_on.push(gated_feature.clone());
        queue.enqueue(gated);
        queue.enqueue(task(TaskPriority::Low, 1));

        let completed = std::collections::HashSet::new();
        let dequeued = queue.dequeue(&completed).unwrap();
        assert_eq!(dequeued.priority, TaskPriority::Low);
    }

    #[test]
    fn steal_takes_lowest_priority_tasks() {
        let mut queue = WorkQueue::new();
        queue.enqueue(task(TaskPriority::Critical, 0));
        queue.enqueue(task(TaskPriority::High, 1));
        queue.enqueue(task(TaskPriority::Low, 2));

        let stolen = queue.steal(1);
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].priority, TaskPriority::Low);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn failed_task_never_auto_unblocks_dependents() {
        let mut dispatcher = Dispatcher::new();
        let agent_id = AgentId::generate();
        dispatcher.register_agent(Agent::new(agent_id));
        dispatcher.submit(task(TaskPriority::Normal, 0));
        dispatcher.assign_tasks().unwrap();
        let result = dispatcher
            .complete_task(agent_id, false, serde_json::json!({"error": "boom"}))
            .unwrap();
        assert!(!result.success);
        assert!(dispatcher.completed_features.is_empty());
    }
}
