//! Cross-component wiring scenarios: these exercise two components
//! together the way a host process would, not just one in isolation.

use devctl_core::breakers::MultiLevelCircuitBreaker;
use devctl_core::dependency::{DependencyGraph, ExecutionPlanner, Feature, FeatureStatus};
use devctl_core::domain_types::FeatureId;
use devctl_core::dispatch::{Agent, Dispatcher, Task, TaskPriority, TaskStatus};
use devctl_core::domain_types::{AgentId, TaskId};

fn fid(s: &str) -> FeatureId {
    FeatureId::try_new(s.to_string()).unwrap()
}

#[test]
fn dispatcher_only_assigns_tasks_whose_dependency_features_completed() {
    let mut graph = DependencyGraph::new();
    graph.add_feature(Feature::new(fid("db-schema"), 1)).unwrap();
    let mut api = Feature::new(fid("api"), 1);
    api.dependencies.push(fid("db-schema"));
    graph.add_feature(api).unwrap();

    let planner = ExecutionPlanner::new(&graph);
    assert_eq!(planner.create_sequential_plan(), vec![fid("db-schema"), fid("api")]);

    let mut dispatcher = Dispatcher::new();
    let agent_id = AgentId::generate();
    dispatcher.register_agent(Agent::new(agent_id));

    let mut gated_task = Task {
        id: TaskId::generate(),
        priority: TaskPriority::Critical,
        depends_on: vec![fid("db-schema")],
        created_at: 0,
        status: TaskStatus::Pending,
        payload: serde_json::json!({}),
    };
    dispatcher.submit(gated_task.clone());

    let assignments = dispatcher.assign_tasks().unwrap();
    assert!(assignments.is_empty(), "gated task must not be assigned yet");

    dispatcher.mark_feature_complete(fid("db-schema"));
    let assignments = dispatcher.assign_tasks().unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].1, gated_task.id);

    graph.set_status(&fid("db-schema"), FeatureStatus::Complete).unwrap();
    assert_eq!(graph.ready_features(), vec![fid("api")]);

    gated_task.status = TaskStatus::Running;
}

#[test]
fn open_breaker_signals_the_loop_should_not_start_another_iteration() {
    let mut combined = MultiLevelCircuitBreaker::new();
    let max = combined.token.config().max_tokens;
    combined.token.consume(max);

    let check = combined.check();
    assert!(check.is_open());
}
