//! HTTP collaborator, assertions and the persistence side channel shared by
//! the request and GraphQL nodes.

use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::has_vars;
use crate::flow::{default_successors, FlowContext, FlowNodeRequest, FlowNodeResult};
use crate::vars::Env;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: body.to_string().into_bytes(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into().into_bytes(),
        }
    }
}

/// Transport collaborator. Connection reuse and TLS are its concern.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn do_request(&self, request: HttpRequest) -> anyhow::Result<HttpResponse>;
}

/// JSON when the body parses, text otherwise.
pub fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

pub fn request_value(request: &HttpRequest) -> Value {
    json!({
        "url": request.url,
        "method": request.method,
        "headers": request.headers,
        "query": request.query,
        "body": request.body.as_deref().map(|b| parse_body(b.as_bytes())).unwrap_or(Value::Null),
    })
}

pub fn response_value(response: &HttpResponse, duration: Duration) -> Value {
    json!({
        "status": response.status,
        "headers": response.headers,
        "body": parse_body(&response.body),
        "duration": duration.as_millis() as u64,
    })
}

/// A user-authored boolean check over the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub expression: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl Assertion {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub expression: String,
    pub passed: bool,
    pub error: Option<String>,
}

/// Evaluate every enabled assertion. Evaluation errors count as failures.
pub async fn evaluate_assertions(env: &Env, assertions: &[Assertion]) -> Vec<AssertionResult> {
    let mut results = Vec::new();
    for assertion in assertions.iter().filter(|a| a.enabled) {
        let outcome = if has_vars(&assertion.expression) {
            env.interpolate_value(assertion.expression.trim()).await.and_then(|v| match v {
                Value::Bool(b) => Ok(b),
                other => Err(FlowError::expression(
                    &assertion.expression,
                    format!("expected boolean, got {}", other),
                )),
            })
        } else {
            env.eval_bool(&assertion.expression)
        };
        let (passed, error) = match outcome {
            Ok(passed) => (passed, None),
            Err(err) => (false, Some(err.to_string())),
        };
        results.push(AssertionResult {
            expression: assertion.expression.clone(),
            passed,
            error,
        });
    }
    results
}

/// Response record handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub id: Id,
    pub node_id: Id,
    pub execution_id: Id,
    pub name: String,
    pub request: Value,
    pub response: Value,
    pub assertions: Vec<AssertionResult>,
}

pub struct SideChannelMessage {
    pub record: ResponseRecord,
    pub ack: oneshot::Sender<()>,
}

/// Out-of-band queue to the persistence collaborator. Delivery waits for the
/// collaborator's acknowledgement.
#[derive(Clone)]
pub struct SideChannel {
    sender: mpsc::Sender<SideChannelMessage>,
}

impl SideChannel {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SideChannelMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    pub async fn deliver(&self, record: ResponseRecord, ack_timeout: Duration) -> Result<()> {
        let (ack, acked) = oneshot::channel();
        self.sender
            .send(SideChannelMessage { record, ack })
            .await
            .map_err(|_| FlowError::internal("side channel receiver dropped"))?;
        match tokio::time::timeout(ack_timeout, acked).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(FlowError::internal("side channel closed before acknowledging")),
            Err(_) => Err(FlowError::timeout("side channel acknowledgement", ack_timeout)),
        }
    }
}

/// Interpolate each `(key, value)` pair; later keys win.
pub(crate) async fn interpolate_pairs(env: &Env, pairs: &[(String, String)]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (key, value) in pairs {
        out.insert(env.interpolate(key).await?, env.interpolate(value).await?);
    }
    Ok(out)
}

/// One bounded exchange with the collaborator.
pub(crate) async fn exchange(
    ctx: &FlowContext,
    client: &dyn HttpClient,
    request: HttpRequest,
    timeout: Duration,
    name: &str,
) -> Result<(HttpResponse, Duration)> {
    let started = Instant::now();
    debug!(method = %request.method, url = %request.url, "sending request");
    let response = ctx
        .run(name, tokio::time::timeout(timeout, client.do_request(request)))
        .await?
        .map_err(|_| FlowError::timeout(format!("{} request", name), timeout))?
        .map_err(|e| FlowError::execution(name, format!("{:#}", e)))?;
    Ok((response, started.elapsed()))
}

/// Everything a request-style node produced, ready to be checked and
/// published.
pub(crate) struct Exchanged<'a> {
    pub node_id: Id,
    pub name: &'a str,
    pub request: Value,
    pub response: Value,
    /// Extra top-level bindings for assertions
    pub shortcuts: Map<String, Value>,
    pub assertions: &'a [Assertion],
    pub side_channel: Option<&'a SideChannel>,
}

/// Run assertions, hand the record to the side channel, and publish the
/// outputs when every assertion passed.
pub(crate) async fn settle(req: &FlowNodeRequest, exchanged: Exchanged<'_>) -> FlowNodeResult {
    let Exchanged {
        node_id,
        name,
        request,
        response,
        mut shortcuts,
        assertions,
        side_channel,
    } = exchanged;

    shortcuts.insert("response".to_string(), response.clone());
    shortcuts.insert(
        name.to_string(),
        json!({"request": request.clone(), "response": response.clone()}),
    );
    let assertion_env = req.env.overlay(shortcuts);
    let results = evaluate_assertions(&assertion_env, assertions).await;
    let failed: Vec<String> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| match &r.error {
            Some(error) => format!("{} ({})", r.expression, error),
            None => r.expression.clone(),
        })
        .collect();

    let record = ResponseRecord {
        id: Id::new(),
        node_id,
        execution_id: req.execution_id,
        name: name.to_string(),
        request: request.clone(),
        response: response.clone(),
        assertions: results,
    };
    let record_id = record.id;
    if let Some(channel) = side_channel {
        if let Err(err) = channel.deliver(record, req.config.side_channel_ack_timeout()).await {
            warn!(node = name, error = %err, "response record not acknowledged");
        }
    }

    if !failed.is_empty() {
        return FlowNodeResult::failed(FlowError::Assertion { failed }).with_aux(record_id);
    }

    let published = req
        .env
        .set(&format!("{}.request", name), request)
        .and_then(|_| req.env.set(&format!("{}.response", name), response));
    match published {
        Ok(()) => FlowNodeResult::next(default_successors(req, node_id)).with_aux(record_id),
        Err(err) => FlowNodeResult::failed(err),
    }
}
