//! Feature dependency engine: cycle detection, topological ordering,
//! critical-path analysis, and wave-based execution planning.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

use crate::domain_types::FeatureId;
use crate::persistence;

/// Lifecycle status of a feature node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureStatus {
    /// Not yet started.
    Pending,
    /// Ready to start (all dependencies complete) but not yet claimed.
    Ready,
    /// Currently being worked.
    InProgress,
    /// Finished.
    Complete,
    /// Blocked on an incomplete dependency.
    Blocked,
    /// Abandoned; will never complete.
    Failed,
}

/// A node in the dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Unique name of the feature.
    pub id: FeatureId,
    /// Features this one depends on.
    pub dependencies: Vec<FeatureId>,
    /// Scheduling priority; lower sorts first among ready features.
    pub priority: i64,
    /// Current lifecycle status.
    pub status: FeatureStatus,
}

impl Feature {
    /// Builds a new, pending feature with no dependencies.
    #[must_use]
    pub fn new(id: FeatureId, priority: i64) -> Self {
        Self {
            id,
            dependencies: Vec::new(),
            priority,
            status: FeatureStatus::Pending,
        }
    }
}

/// Errors raised while mutating or querying the graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Adding this feature/dependency would introduce a cycle.
    #[error("adding dependency from {from} to {to} would create a cycle")]
    WouldCycle {
        /// The dependent feature.
        from: FeatureId,
        /// The dependency feature.
        to: FeatureId,
    },

    /// The referenced feature id is not in the graph.
    #[error("unknown feature: {0}")]
    UnknownFeature(FeatureId),

    /// Persistence failure saving/loading the graph.
    #[error(transparent)]
    Persistence(#[from] crate::error::PersistenceError),
}

/// The feature dependency DAG.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    features: HashMap<FeatureId, Feature>,
}

impl DependencyGraph {
    /// Builds an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `feature`, rejecting it if its declared dependencies would
    /// introduce a cycle.
    pub fn add_feature(&mut self, feature: Feature) -> Result<(), GraphError> {
        let candidate_id = feature.id.clone();
        self.features.insert(candidate_id.clone(), feature);
        if self.find_cycle().is_some() {
            self.features.remove(&candidate_id);
            return Err(GraphError::WouldCycle {
                from: candidate_id.clone(),
                to: candidate_id,
            });
        }
        Ok(())
    }

    /// Looks up a feature by id.
    #[must_use]
    pub fn get(&self, id: &FeatureId) -> Option<&Feature> {
        self.features.get(id)
    }

    /// Updates a feature's status.
    pub fn set_status(&mut self, id: &FeatureId, status: FeatureStatus) -> Result<(), GraphError> {
        self.features
            .get_mut(id)
            .map(|f| f.status = status)
            .ok_or_else(|| GraphError::UnknownFeature(id.clone()))
    }

    /// Detects a cycle via DFS with a recursion stack, returning the
    /// cyclic path if one exists.
    #[must_use]
    pub fn find_cycle(&self) -> Option<Vec<FeatureId>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for id in self.features.keys() {
            if !visited.contains(id) {
                if let Some(cycle) =
                    self.dfs_find_cycle(id, &mut visited, &mut rec_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_find_cycle(
        &self,
        id: &FeatureId,
        visited: &mut HashSet<FeatureId>,
        rec_stack: &mut HashSet<FeatureId>,
        path: &mut Vec<FeatureId>,
    ) -> Option<Vec<FeatureId>> {
        visited.insert(id.clone());
        rec_stack.insert(id.clone());
        path.push(id.clone());

        if let Some(feature) = self.features.get(id) {
            for dep in &feature.dependencies {
                if !self.features.contains_key(dep) {
                    continue;
                }
                if rec_stack.contains(dep) {
                    let start = path.iter().position(|p| p == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_find_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        rec_stack.remove(id);
        None
    }

    /// Returns a topological ordering (dependencies before dependents),
    /// breaking ties by ascending priority, via Kahn's algorithm.
    #[must_use]
    pub fn topological_sort(&self) -> Option<Vec<FeatureId>> {
        let mut in_degree: HashMap<FeatureId, usize> =
            self.features.keys().map(|id| (id.clone(), 0)).collect();
        for feature in self.features.values() {
            for dep in &feature.dependencies {
                if self.features.contains_key(dep) {
                    *in_degree.get_mut(&feature.id).unwrap() += 1;
                }
            }
        }

        let mut ready: Vec<FeatureId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        sort_by_priority(&mut ready, &self.features);

        let mut order = Vec::new();
        let mut dependents: HashMap<FeatureId, Vec<FeatureId>> = HashMap::new();
        for feature in self.features.values() {
            for dep in &feature.dependencies {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(feature.id.clone());
            }
        }

        while let Some(next) = ready.pop() {
            order.push(next.clone());
            if let Some(children) = dependents.get(&next) {
                let mut newly_ready = Vec::new();
                for child in children {
                    let deg = in_degree.get_mut(child).unwrap();
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(child.clone());
                    }
                }
                ready.extend(newly_ready);
                sort_by_priority(&mut ready, &self.features);
            }
        }

        if order.len() == self.features.len() {
            Some(order)
        } else {
            None
        }
    }

    /// Features whose dependencies are all `Complete` and which are
    /// themselves still `Pending`.
    #[must_use]
    pub fn ready_features(&self) -> Vec<FeatureId> {
        self.features
            .values()
            .filter(|f| f.status == FeatureStatus::Pending)
            .filter(|f| {
                f.dependencies.iter().all(|dep| {
                    self.features
                        .get(dep)
                        .is_none_or(|d| d.status == FeatureStatus::Complete)
                })
            })
            .map(|f| f.id.clone())
            .collect()
    }

    /// Features blocked on at least one incomplete dependency.
    #[must_use]
    pub fn blocked_features(&self) -> Vec<FeatureId> {
        self.features
            .values()
            .filter(|f| f.status != FeatureStatus::Complete)
            .filter(|f| {
                f.dependencies.iter().any(|dep| {
                    self.features
                        .get(dep)
                        .is_some_and(|d| d.status != FeatureStatus::Complete)
                })
            })
            .map(|f| f.id.clone())
            .collect()
    }

    /// Features that depend directly on `id`.
    #[must_use]
    pub fn dependents_of(&self, id: &FeatureId) -> Vec<FeatureId> {
        self.features
            .values()
            .filter(|f| f.dependencies.contains(id))
            .map(|f| f.id.clone())
            .collect()
    }

    /// Priority score per spec: `100 - priority + 10*dependents +
    /// (50 if on the critical path)`.
    #[must_use]
    pub fn calculate_priority_scores(&self) -> HashMap<FeatureId, i64> {
        let critical_path: HashSet<FeatureId> = CriticalPathAnalyzer::new(self)
            .longest_path()
            .into_iter()
            .collect();
        self.features
            .values()
            .map(|f| {
                let dependents = self.dependents_of(&f.id).len() as i64;
                let on_critical = critical_path.contains(&f.id);
                let score = 100 - f.priority + 10 * dependents + if on_critical { 50 } else { 0 };
                (f.id.clone(), score)
            })
            .collect()
    }

    /// Renders the graph as a Mermaid flowchart, coloring nodes by
    /// status.
    #[must_use]
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        let mut ids: Vec<&FeatureId> = self.features.keys().collect();
        ids.sort();
        for id in &ids {
            let feature = &self.features[*id];
            for dep in &feature.dependencies {
                let _ = writeln!(out, "    {dep}-->{id}");
            }
            if feature.dependencies.is_empty() {
                let _ = writeln!(out, "    {id}");
            }
        }
        for id in &ids {
            let class = match self.features[*id].status {
                FeatureStatus::Complete => "complete",
                FeatureStatus::InProgress => "in_progress",
                FeatureStatus::Blocked => "blocked",
                FeatureStatus::Failed => "failed",
                FeatureStatus::Ready | FeatureStatus::Pending => continue,
            };
            let _ = writeln!(out, "    class {id} {class}");
        }
        out.push_str("    classDef complete fill:#90EE90\n");
        out.push_str("    classDef in_progress fill:#FFD700\n");
        out.push_str("    classDef blocked fill:#FFA07A\n");
        out.push_str("    classDef failed fill:#FF6347\n");
        out
    }

    /// Saves the graph to `path`.
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        persistence::save_json(path, self)?;
        Ok(())
    }

    /// Loads a graph from `path`.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        Ok(persistence::load_json(path)?)
    }
}

fn sort_by_priority(ids: &mut [FeatureId], features: &HashMap<FeatureId, Feature>) {
    // Ascending priority number pops last from `ready.pop()`, so the
    // lowest-priority-number feature (highest scheduling priority) is
    // sorted to the end and dequeued first.
    ids.sort_by(|a, b| {
        features[b]
            .priority
            .cmp(&features[a].priority)
            .then_with(|| a.cmp(b))
    });
}

/// Computes the longest dependency chain (by edge count) through the
/// graph, i.e. the critical path.
pub struct CriticalPathAnalyzer<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> CriticalPathAnalyzer<'a> {
    /// Builds an analyzer over `graph`.
    #[must_use]
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// Returns the longest path through the graph, as a feature-id
    /// sequence in dependency order. Empty if the graph is empty or
    /// cyclic.
    #[must_use]
    pub fn longest_path(&self) -> Vec<FeatureId> {
        let Some(order) = self.graph.topological_sort() else {
            return Vec::new();
        };

        let mut length: HashMap<FeatureId, u32> = HashMap::new();
        let mut predecessor: HashMap<FeatureId, FeatureId> = HashMap::new();

        for id in &order {
            let feature = &self.graph.features[id];
            let mut best_len = 0u32;
            let mut best_pred = None;
            for dep in &feature.dependencies {
                if let Some(&dep_len) = length.get(dep) {
                    if dep_len + 1 > best_len {
                        best_len = dep_len + 1;
                        best_pred = Some(dep.clone());
                    }
                }
            }
            length.insert(id.clone(), best_len);
            if let Some(pred) = best_pred {
                predecessor.insert(id.clone(), pred);
            }
        }

        let Some((end, _)) = length.iter().max_by_key(|(_, len)| **len) else {
            return Vec::new();
        };

        let mut path = vec![end.clone()];
        let mut current = end.clone();
        while let Some(pred) = predecessor.get(&current) {
            path.push(pred.clone());
            current = pred.clone();
        }
        path.reverse();
        path
    }

    /// Weight (edge count) of the critical path.
    #[must_use]
    pub fn critical_path_weight(&self) -> usize {
        self.longest_path().len().saturating_sub(1)
    }
}

/// A wave of features that can proceed in parallel, all of whose
/// dependencies were satisfied by an earlier wave.
pub type Wave = Vec<FeatureId>;

/// Builds sequential or wave-parallel execution plans from a graph.
pub struct ExecutionPlanner<'a> {
    graph: &'a DependencyGraph,
}

impl<'a> ExecutionPlanner<'a> {
    /// Builds a planner over `graph`.
    #[must_use]
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self { graph }
    }

    /// A single linear order respecting all dependencies.
    #[must_use]
    pub fn create_sequential_plan(&self) -> Vec<FeatureId> {
        self.graph.topological_sort().unwrap_or_default()
    }

    /// Groups the topological order into waves: a feature lands in the
    /// earliest wave after all of its dependencies' waves.
    #[must_use]
    pub fn create_parallel_plan(&self) -> Vec<Wave> {
        let Some(order) = self.graph.topological_sort() else {
            return Vec::new();
        };

        let mut wave_of: HashMap<FeatureId, usize> = HashMap::new();
        for id in &order {
            let feature = &self.graph.features[id];
            let wave = feature
                .dependencies
                .iter()
                .filter_map(|dep| wave_of.get(dep))
                .max()
                .map_or(0, |w| w + 1);
            wave_of.insert(id.clone(), wave);
        }

        let max_wave = wave_of.values().copied().max().unwrap_or(0);
        let mut waves: Vec<Wave> = vec![Vec::new(); max_wave + 1];
        for id in &order {
            waves[wave_of[id]].push(id.clone());
        }
        waves
    }

    /// The single highest-priority ready feature, if any.
    #[must_use]
    pub fn get_next_feature(&self) -> Option<FeatureId> {
        let scores = self.graph.calculate_priority_scores();
        self.graph
            .ready_features()
            .into_iter()
            .max_by_key(|id| scores.get(id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(s: &str) -> FeatureId {
        FeatureId::try_new(s.to_string()).unwrap()
    }

    #[test]
    fn detects_cycle() {
        let mut graph = DependencyGraph::new();
        let mut a = Feature::new(fid("a"), 1);
        a.dependencies.push(fid("b"));
        let mut b = Feature::new(fid("b"), 1);
        b.dependencies.push(fid("a"));

        graph.features.insert(fid("a"), a);
        graph.features.insert(fid("b"), b);

        assert!(graph.find_cycle().is_some());
    }

    #[test]
    fn topological_sort_orders_dependencies_first() {
        let mut graph = DependencyGraph::new();
        let a = Feature::new(fid("a"), 1);
        let mut b = Feature::new(fid("b"), 1);
        b.dependencies.push(fid("a"));
        graph.features.insert(fid("a"), a);
        graph.features.insert(fid("b"), b);

        let order = graph.topological_sort().unwrap();
        let pos_a = order.iter().position(|x| x == &fid("a")).unwrap();
        let pos_b = order.iter().position(|x| x == &fid("b")).unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn critical_path_weight_matches_longest_chain() {
        let mut graph = DependencyGraph::new();
        graph.features.insert(fid("a"), Feature::new(fid("a"), 1));
        let mut b = Feature::new(fid("b"), 1);
        b.dependencies.push(fid("a"));
        graph.features.insert(fid("b"), b);
        let mut c = Feature::new(fid("c"), 1);
        c.dependencies.push(fid("b"));
        graph.features.insert(fid("c"), c);

        let analyzer = CriticalPathAnalyzer::new(&graph);
        assert_eq!(analyzer.critical_path_weight(), 2);
    }

    #[test]
    fn parallel_plan_groups_independent_features_into_one_wave() {
        let mut graph = DependencyGraph::new();
        graph.features.insert(fid("a"), Feature::new(fid("a"), 1));
        graph.features.insert(fid("b"), Feature::new(fid("b"), 1));
        let mut c = Feature::new(fid("c"), 1);
        c.dependencies.push(fid("a"));
        c.dependencies.push(fid("b"));
        graph.features.insert(fid("c"), c);

        let planner = ExecutionPlanner::new(&graph);
        let waves = planner.create_parallel_plan();
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0].len(), 2);
        assert_eq!(waves[1], vec![fid("c")]);
    }

    #[test]
    fn ready_features_excludes_blocked_on_incomplete_dependency() {
        let mut graph = DependencyGraph::new();
        graph.features.insert(fid("a"), Feature::new(fid("a"), 1));
        let mut b = Feature::new(fid("b"), 1);
        b.dependencies.push(fid("a"));
        graph.features.insert(fid("b"), b);

        assert_eq!(graph.ready_features(), vec![fid("a")]);
    }
}
