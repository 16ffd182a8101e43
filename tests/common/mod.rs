//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use flowrun::ai::{ChatMessage, ContentChoice, GenerateOptions, LlmModel, LlmProviderFactory};
use flowrun::nodes::{HttpClient, HttpRequest, HttpResponse, JsExecutor};
use flowrun::vars::{SecretFetcher, SecretProvider};
use flowrun::flow::default_successors;
use flowrun::{
    BufferingStatusSink, EngineConfig, FlowContext, FlowError, FlowGraph, FlowNode, FlowNodeRequest,
    FlowNodeResult, FlowNodeStatus, FlowRunner, Id, NodeState,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Replies from a queue and records every request it saw.
#[derive(Default)]
pub struct ScriptedHttpClient {
    replies: Mutex<VecDeque<anyhow::Result<HttpResponse>>>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, response: HttpResponse) {
        self.replies.lock().push_back(Ok(response));
    }

    pub fn fail(&self, message: &str) {
        self.replies.lock().push_back(Err(anyhow!(message.to_string())));
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.url.clone()).collect()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn do_request(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::json(200, &json!({}))))
    }
}

/// Returns scripted choices in order and keeps the message history of each
/// call.
#[derive(Default)]
pub struct ScriptedModel {
    turns: Mutex<VecDeque<anyhow::Result<Vec<ContentChoice>>>>,
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    pub options: Mutex<Vec<GenerateOptions>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn then(&self, choice: ContentChoice) {
        self.turns.lock().push_back(Ok(vec![choice]));
    }

    pub fn then_fail(&self, message: &str) {
        self.turns.lock().push_back(Err(anyhow!(message.to_string())));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl LlmModel for ScriptedModel {
    async fn generate_content(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> anyhow::Result<Vec<ContentChoice>> {
        self.calls.lock().push(messages.to_vec());
        self.options.lock().push(options.clone());
        self.turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![ContentChoice::text("done")]))
    }
}

/// Hands out the same scripted model for every credential.
pub struct ScriptedFactory {
    pub model: Arc<ScriptedModel>,
    pub credentials: Mutex<Vec<(String, String)>>,
}

impl ScriptedFactory {
    pub fn new(model: Arc<ScriptedModel>) -> Arc<Self> {
        Arc::new(Self {
            model,
            credentials: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LlmProviderFactory for ScriptedFactory {
    async fn create(&self, credential_id: &str, model: &str) -> anyhow::Result<Arc<dyn LlmModel>> {
        self.credentials
            .lock()
            .push((credential_id.to_string(), model.to_string()));
        Ok(self.model.clone())
    }
}

/// Evaluates nothing; answers with a fixed result or error.
pub struct FixedJs {
    pub result: anyhow::Result<Value>,
    pub contexts: Mutex<Vec<Value>>,
}

impl FixedJs {
    pub fn ok(value: Value) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(value),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn err(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(anyhow!(message.to_string())),
            contexts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl JsExecutor for FixedJs {
    async fn run(&self, _code: &str, context: Value) -> anyhow::Result<Value> {
        self.contexts.lock().push(context);
        match &self.result {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(anyhow!(err.to_string())),
        }
    }
}

/// In-memory secret store counting fetches.
#[derive(Default)]
pub struct MapFetcher {
    pub secrets: HashMap<String, String>,
    pub fetches: AtomicUsize,
}

impl MapFetcher {
    pub fn with(entries: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            secrets: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SecretFetcher for MapFetcher {
    async fn fetch(&self, _provider: SecretProvider, reference: &str) -> anyhow::Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("secret '{}' not found", reference))
    }
}

/// Custom node that counts its runs, publishes `{name}.count`, and can be
/// told to fail on a given run (1-based).
pub struct CountingNode {
    id: Id,
    name: String,
    pub runs: AtomicUsize,
    fail_on: Option<usize>,
    required: Vec<String>,
}

impl CountingNode {
    pub fn new(id: Id, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            runs: AtomicUsize::new(0),
            fail_on: None,
            required: Vec::new(),
        }
    }

    pub fn failing_on(mut self, run: usize) -> Self {
        self.fail_on = Some(run);
        self
    }

    pub fn requiring(mut self, variable: &str) -> Self {
        self.required.push(variable.to_string());
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlowNode for CountingNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run_sync(&self, _ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        for variable in &self.required {
            if let Err(err) = req.env.get(variable) {
                return FlowNodeResult::failed(err);
            }
        }
        if self.fail_on == Some(run) {
            return FlowNodeResult::failed(FlowError::execution(&self.name, format!("run {} failed", run)));
        }
        if let Err(err) = req.env.set(&format!("{}.count", self.name), json!(run)) {
            return FlowNodeResult::failed(err);
        }
        FlowNodeResult::next(default_successors(req, self.id))
    }

    fn required_variables(&self) -> Vec<String> {
        self.required.clone()
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["count".to_string()]
    }
}

pub fn runner(graph: FlowGraph, config: EngineConfig) -> (FlowRunner, Arc<BufferingStatusSink>) {
    flowrun::core::telemetry::init_tracing(tracing::Level::DEBUG);
    let sink = Arc::new(BufferingStatusSink::new());
    let runner = FlowRunner::new(graph, config, sink.clone()).expect("valid flow");
    (runner, sink)
}

pub fn parallel_config(timeout_secs: u64) -> EngineConfig {
    EngineConfig {
        flow_timeout_secs: Some(timeout_secs),
        ..EngineConfig::default()
    }
}

/// `(name, state)` pairs in stream order.
pub fn trace(statuses: &[FlowNodeStatus]) -> Vec<(String, NodeState)> {
    statuses.iter().map(|s| (s.name.clone(), s.state)).collect()
}

pub fn iteration_events(statuses: &[FlowNodeStatus]) -> Vec<FlowNodeStatus> {
    statuses.iter().filter(|s| s.iteration_event).cloned().collect()
}

/// Every execution id with a `Running` record has exactly one terminal one.
pub fn assert_balanced(statuses: &[FlowNodeStatus]) {
    let mut open: HashMap<Id, usize> = HashMap::new();
    for status in statuses {
        let entry = open.entry(status.execution_id).or_default();
        match status.state {
            NodeState::Running => *entry += 1,
            _ => *entry += 10,
        }
    }
    for (id, seen) in open {
        assert!(seen == 11 || seen == 10, "execution {} has unbalanced statuses ({})", id, seen);
    }
}
