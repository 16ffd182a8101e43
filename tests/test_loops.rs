//! Counted and for-each loops: iteration records, error policies, break
//! conditions and nesting.

mod common;

use common::*;
use flowrun::nodes::{BreakCondition, Comparison, ErrorHandling, ForEachNode, ForLoopNode, StartNode, ThrowNode};
use flowrun::{Edge, EngineConfig, Env, FlowGraph, FlowNode, FlowStatus, Handle, Id, NodeState};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

/// `Start -> loop_node` with `loop_node -loop-> body`.
fn loop_graph(start: Id, loop_node: Arc<dyn FlowNode>, body: Vec<Arc<dyn FlowNode>>) -> FlowGraph {
    let loop_id = loop_node.id();
    let mut edges = vec![Edge::new(start, loop_id, Handle::Unspecified)];
    edges.extend(body.iter().map(|b| Edge::new(loop_id, b.id(), Handle::Loop)));
    let mut nodes: Vec<Arc<dyn FlowNode>> = vec![Arc::new(StartNode::new(start, "Start")), loop_node];
    nodes.extend(body);
    FlowGraph::new(start, nodes, edges)
}

fn iteration_trace(sink: &flowrun::BufferingStatusSink) -> Vec<(String, NodeState, Option<usize>)> {
    iteration_events(&sink.node_statuses())
        .into_iter()
        .map(|s| (s.name, s.state, s.iteration_index))
        .collect()
}

#[tokio::test]
async fn test_counted_loop_runs_body_each_iteration() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X"));
    let graph = loop_graph(start, Arc::new(ForLoopNode::new(looped, "Loop", 3)), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, EngineConfig::default());

    let env = Env::new();
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 3);
    assert_eq!(
        iteration_trace(&sink),
        vec![
            ("Loop iteration 1".to_string(), NodeState::Running, Some(0)),
            ("Loop iteration 1".to_string(), NodeState::Success, Some(0)),
            ("Loop iteration 2".to_string(), NodeState::Running, Some(1)),
            ("Loop iteration 2".to_string(), NodeState::Success, Some(1)),
            ("Loop iteration 3".to_string(), NodeState::Running, Some(2)),
            ("Loop iteration 3".to_string(), NodeState::Success, Some(2)),
        ]
    );
    assert!(sink.node_statuses().iter().all(|s| s.name != "Error Summary"));
    assert_balanced(&sink.node_statuses());
    assert_eq!(env.get_untracked("Loop.index"), Some(json!(2)));
    assert_eq!(sink.flow_statuses().last(), Some(&FlowStatus::Success));
}

#[tokio::test]
async fn test_counted_loop_failure_emits_summary() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X").failing_on(2));
    let graph = loop_graph(start, Arc::new(ForLoopNode::new(looped, "Loop", 3)), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert_eq!(report.status, FlowStatus::Failed);
    assert_eq!(x.runs(), 2);
    let events = iteration_events(&sink.node_statuses());
    assert_eq!(
        events.iter().map(|s| (s.name.as_str(), s.state)).collect::<Vec<_>>(),
        vec![
            ("Loop iteration 1", NodeState::Running),
            ("Loop iteration 1", NodeState::Success),
            ("Loop iteration 2", NodeState::Running),
            ("Loop iteration 2", NodeState::Failure),
            ("Error Summary", NodeState::Failure),
        ]
    );
    let summary = &events[4];
    assert_eq!(
        summary.output_data,
        Some(json!({"failedAtIteration": 1, "totalIterations": 3}))
    );
    assert_eq!(summary.loop_node_id, Some(looped));
    assert_eq!(summary.iteration_index, None);
    assert_ne!(summary.execution_id, events[3].execution_id);
    assert_balanced(&sink.node_statuses());

    let loop_end = sink
        .node_statuses()
        .into_iter()
        .rev()
        .find(|s| s.name == "Loop")
        .expect("loop status");
    assert_eq!(loop_end.state, NodeState::Failure);
}

#[tokio::test]
async fn test_ignore_policy_keeps_iterating() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X").failing_on(2));
    let node = ForLoopNode::new(looped, "Loop", 3).with_error_handling(ErrorHandling::Ignore);
    let graph = loop_graph(start, Arc::new(node), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 3);
    let states: Vec<NodeState> = iteration_trace(&sink).into_iter().map(|(_, s, _)| s).collect();
    assert_eq!(
        states,
        vec![
            NodeState::Running,
            NodeState::Success,
            NodeState::Running,
            NodeState::Failure,
            NodeState::Running,
            NodeState::Success,
        ]
    );
}

#[tokio::test]
async fn test_break_policy_leaves_loop_successfully() {
    let (start, looped, body, after) = (Id::new(), Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X").failing_on(2));
    let after_node = Arc::new(CountingNode::new(after, "After"));
    let node = ForLoopNode::new(looped, "Loop", 5).with_error_handling(ErrorHandling::Break);
    let mut graph_nodes: Vec<Arc<dyn FlowNode>> = vec![
        Arc::new(StartNode::new(start, "Start")),
        Arc::new(node),
        x.clone(),
    ];
    graph_nodes.push(after_node.clone());
    let graph = FlowGraph::new(
        start,
        graph_nodes,
        vec![
            Edge::new(start, looped, Handle::Unspecified),
            Edge::new(looped, body, Handle::Loop),
            Edge::new(looped, after, Handle::Then),
        ],
    );
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 2);
    assert_eq!(after_node.runs(), 1);
    assert_eq!(iteration_trace(&sink).len(), 4);
}

#[tokio::test]
async fn test_throw_escapes_ignore_policy() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let node = ForLoopNode::new(looped, "Loop", 3).with_error_handling(ErrorHandling::Ignore);
    let graph = loop_graph(
        start,
        Arc::new(node),
        vec![Arc::new(ThrowNode::new(body, "Stop", "halt at {{ Loop.index }}")) as Arc<dyn FlowNode>],
    );
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert_eq!(report.status, FlowStatus::Canceled);
    assert!(report.error.expect("error").to_string().contains("halt at 0"));
    let events = iteration_trace(&sink);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].1, NodeState::Canceled);
    assert_balanced(&sink.node_statuses());
}

#[tokio::test]
async fn test_break_condition_checked_before_each_iteration() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X"));
    let node = ForLoopNode::new(looped, "Loop", 10)
        .with_break_condition(BreakCondition::new("Loop.index", Comparison::LessThan, json!(3)));
    let graph = loop_graph(start, Arc::new(node), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert!(report.is_success());
    assert_eq!(x.runs(), 3);
    assert_eq!(iteration_trace(&sink).len(), 6);
}

#[tokio::test]
async fn test_for_each_publishes_items() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X").requiring("Each.value.name"));
    let graph = loop_graph(start, Arc::new(ForEachNode::new(looped, "Each", "users")), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, EngineConfig::default());

    let env = Env::from_value(json!({"users": [{"name": "ada"}, {"name": "bob"}]}));
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 2);
    assert_eq!(env.get_untracked("Each.value"), Some(json!({"name": "bob"})));
    assert_eq!(env.get_untracked("Each.index"), Some(json!(1)));
    assert_eq!(env.get_untracked("Each.key"), None);

    let reads: Vec<_> = sink
        .node_statuses()
        .into_iter()
        .filter(|s| s.name == "X" && s.state == NodeState::Success)
        .map(|s| s.input_data)
        .collect();
    assert_eq!(
        reads,
        vec![
            Some(json!({"Each": {"value": {"name": "ada"}}})),
            Some(json!({"Each": {"value": {"name": "bob"}}})),
        ]
    );
}

#[tokio::test]
async fn test_for_each_over_map_publishes_keys() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X"));
    let graph = loop_graph(
        start,
        Arc::new(ForEachNode::new(looped, "Each", "{{ limits }}")),
        vec![x.clone() as Arc<dyn FlowNode>],
    );
    let (runner, _sink) = runner(graph, EngineConfig::default());

    let env = Env::from_value(json!({"limits": {"cpu": 2, "mem": 512}}));
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 2);
    assert_eq!(env.get_untracked("Each.key"), Some(json!("mem")));
    assert_eq!(env.get_untracked("Each.value"), Some(json!(512)));
}

#[tokio::test]
async fn test_nested_loops_carry_iteration_context() {
    let (start, outer, inner, body) = (Id::new(), Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X"));
    let graph = FlowGraph::new(
        start,
        vec![
            Arc::new(StartNode::new(start, "Start")) as Arc<dyn FlowNode>,
            Arc::new(ForLoopNode::new(outer, "Outer", 2)),
            Arc::new(ForLoopNode::new(inner, "Inner", 2)),
            x.clone(),
        ],
        vec![
            Edge::new(start, outer, Handle::Unspecified),
            Edge::new(outer, inner, Handle::Loop),
            Edge::new(inner, body, Handle::Loop),
        ],
    );
    let (runner, sink) = runner(graph, EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 4);
    let paths: Vec<Vec<usize>> = sink
        .node_statuses()
        .into_iter()
        .filter(|s| s.name == "X" && s.state == NodeState::Running)
        .filter_map(|s| s.iteration_context.map(|c| c.iteration_path))
        .collect();
    assert_eq!(paths, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
    assert_balanced(&sink.node_statuses());
}

#[tokio::test]
async fn test_loop_in_parallel_mode() {
    let (start, looped, body) = (Id::new(), Id::new(), Id::new());
    let x = Arc::new(CountingNode::new(body, "X"));
    let graph = loop_graph(start, Arc::new(ForLoopNode::new(looped, "Loop", 3)), vec![x.clone() as Arc<dyn FlowNode>]);
    let (runner, sink) = runner(graph, parallel_config(10));

    let report = runner.run(Env::new()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(x.runs(), 3);
    assert_eq!(iteration_trace(&sink).len(), 6);
    assert_balanced(&sink.node_statuses());
}
