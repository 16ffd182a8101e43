//! Request, GraphQL and JavaScript nodes against scripted collaborators.

mod common;

use common::*;
use flowrun::nodes::{Assertion, GraphQlNode, HttpResponse, JavaScriptNode, RequestNode, SideChannel, StartNode};
use flowrun::{Edge, EngineConfig, Env, FlowError, FlowGraph, FlowNode, FlowStatus, Handle, Id, NodeState};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn single(node: Arc<dyn FlowNode>) -> FlowGraph {
    let start = Id::new();
    let id = node.id();
    FlowGraph::new(
        start,
        vec![Arc::new(StartNode::new(start, "Start")) as Arc<dyn FlowNode>, node],
        vec![Edge::new(start, id, Handle::Unspecified)],
    )
}

#[tokio::test]
async fn test_request_builds_from_templates() {
    let client = ScriptedHttpClient::new();
    client.reply(HttpResponse::json(201, &json!({"id": 9})));
    let node = RequestNode::new(Id::new(), "Create", "post", "{{ base }}/users", client.clone())
        .header("Authorization", "Bearer {{ auth.token }}")
        .query("dry", "{{ dry }}")
        .body(r#"{"name": "{{ user.name }}"}"#)
        .assertion(Assertion::new("response.status == 201"))
        .assertion(Assertion::new("Create.response.body.id == 9"));
    let (runner, _sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let env = Env::from_value(json!({
        "base": "http://api",
        "auth": {"token": "t0k"},
        "dry": false,
        "user": {"name": "ada"}
    }));
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    let sent = client.requests.lock()[0].clone();
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.url, "http://api/users");
    assert_eq!(sent.headers["Authorization"], "Bearer t0k");
    assert_eq!(sent.query["dry"], "false");
    assert_eq!(sent.body.as_deref(), Some(r#"{"name": "ada"}"#));

    assert_eq!(env.get_untracked("Create.response.status"), Some(json!(201)));
    assert_eq!(env.get_untracked("Create.response.body.id"), Some(json!(9)));
    assert_eq!(env.get_untracked("Create.request.body"), Some(json!({"name": "ada"})));
}

#[tokio::test]
async fn test_failed_assertion_fails_node_without_publishing() {
    let client = ScriptedHttpClient::new();
    client.reply(HttpResponse::json(500, &json!({"error": "boom"})));
    let node = RequestNode::new(Id::new(), "Fetch", "GET", "/x", client.clone())
        .assertion(Assertion::new("response.status < 300"))
        .assertion(Assertion::new("response.status == 999").disabled());
    let (runner, sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let env = Env::new();
    let report = runner.run(env.clone()).await;

    assert_eq!(report.status, FlowStatus::Failed);
    match report.error {
        Some(FlowError::Assertion { failed }) => assert_eq!(failed, vec!["response.status < 300".to_string()]),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!env.has("Fetch"));
    let failure = sink.node_statuses().pop().expect("status");
    assert_eq!(failure.state, NodeState::Failure);
    assert_eq!(failure.error_category.as_deref(), Some("assertion"));
}

#[tokio::test]
async fn test_side_channel_receives_record_and_acks() {
    let client = ScriptedHttpClient::new();
    client.reply(HttpResponse::text(200, "pong"));
    let (channel, mut records) = SideChannel::new(4);
    let node_id = Id::new();
    let node = RequestNode::new(node_id, "Ping", "GET", "/ping", client.clone())
        .assertion(Assertion::new("response.body == 'pong'"))
        .with_side_channel(channel);
    let (runner, _sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let persisted = tokio::spawn(async move {
        let message = records.recv().await.expect("record");
        let record = message.record.clone();
        message.ack.send(()).expect("ack");
        record
    });
    let report = runner.run(Env::new()).await;
    let record = persisted.await.expect("consumer");

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(record.node_id, node_id);
    assert_eq!(record.name, "Ping");
    assert_eq!(record.response["body"], json!("pong"));
    assert_eq!(record.assertions.len(), 1);
    assert!(record.assertions[0].passed);
}

#[tokio::test]
async fn test_transport_error_is_reported() {
    let client = ScriptedHttpClient::new();
    client.fail("connection refused");
    let node = RequestNode::new(Id::new(), "Down", "GET", "/x", client.clone());
    let (runner, _sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let report = runner.run(Env::new()).await;

    assert_eq!(report.status, FlowStatus::Failed);
    let err = report.error.expect("error");
    assert!(matches!(err, FlowError::Execution { .. }));
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_graphql_posts_query_and_exposes_data() {
    let client = ScriptedHttpClient::new();
    client.reply(HttpResponse::json(200, &json!({"data": {"user": {"name": "ada"}}})));
    let node = GraphQlNode::new(
        Id::new(),
        "Query",
        "{{ base }}/graphql",
        "query($id: ID!) { user(id: $id) { name } }",
        client.clone(),
    )
    .variables(r#"{"id": "{{ user_id }}"}"#)
    .assertion(Assertion::new("data.user.name == 'ada'"))
    .assertion(Assertion::new("errors == null"));
    let (runner, _sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let env = Env::from_value(json!({"base": "http://gql", "user_id": "u1"}));
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    let sent = client.requests.lock()[0].clone();
    assert_eq!(sent.method, "POST");
    assert_eq!(sent.url, "http://gql/graphql");
    assert_eq!(sent.headers["Content-Type"], "application/json");
    let body: serde_json::Value = serde_json::from_str(sent.body.as_deref().unwrap_or_default()).unwrap();
    assert_eq!(body["variables"], json!({"id": "u1"}));
    assert_eq!(
        env.get_untracked("Query.response.body.data.user.name"),
        Some(json!("ada"))
    );
}

#[tokio::test]
async fn test_javascript_node_publishes_result_and_unwraps_errors() {
    let ok = FixedJs::ok(json!({"sum": 3}));
    let node = JavaScriptNode::new(Id::new(), "Calc", "return {sum: a + b}", ok.clone());
    let (runner, sink) = runner(single(Arc::new(node)), EngineConfig::default());

    let env = Env::from_value(json!({"a": 1, "b": 2}));
    let report = runner.run(env.clone()).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(env.get_untracked("Calc.sum"), Some(json!(3)));
    assert_eq!(ok.contexts.lock()[0], json!({"a": 1, "b": 2}));
    let done = sink.node_statuses().pop().expect("status");
    assert_eq!(done.input_data, Some(json!({"a": 1, "b": 2})));
    assert_eq!(done.output_data, Some(json!({"Calc": {"sum": 3}})));

    let failing = FixedJs::err("rpc error: code = Internal desc = internal: ReferenceError: c is not defined");
    let node = JavaScriptNode::new(Id::new(), "Broken", "return c", failing);
    let (runner, _sink) = common::runner(single(Arc::new(node)), EngineConfig::default());
    let report = runner.run(Env::new()).await;

    assert_eq!(report.status, FlowStatus::Failed);
    let message = report.error.expect("error").to_string();
    assert!(message.ends_with("ReferenceError: c is not defined"), "{}", message);
    assert!(!message.contains("rpc error"));
}
