use super::http::{
    exchange, interpolate_pairs, parse_body, request_value, response_value, settle, Assertion, Exchanged,
    HttpClient, HttpRequest, SideChannel,
};
use crate::core::errors::{FlowError, Result};
use crate::core::id::Id;
use crate::expr::{template_ai_declarations, template_variables, AiDeclaration};
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// GraphQL over HTTP POST with a `{query, variables}` body.
///
/// Assertions additionally see the response's `data` and `errors` at top
/// level.
pub struct GraphQlNode {
    id: Id,
    name: String,
    url: String,
    query: String,
    variables: Option<String>,
    headers: Vec<(String, String)>,
    assertions: Vec<Assertion>,
    client: Arc<dyn HttpClient>,
    side_channel: Option<SideChannel>,
}

impl GraphQlNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        url: impl Into<String>,
        query: impl Into<String>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            query: query.into(),
            variables: None,
            headers: Vec::new(),
            assertions: Vec::new(),
            client,
            side_channel: None,
        }
    }

    /// JSON object template for the `variables` field.
    pub fn variables(mut self, variables: impl Into<String>) -> Self {
        self.variables = Some(variables.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_side_channel(mut self, channel: SideChannel) -> Self {
        self.side_channel = Some(channel);
        self
    }

    fn templates(&self) -> impl Iterator<Item = &str> {
        [self.url.as_str(), self.query.as_str()]
            .into_iter()
            .chain(self.variables.as_deref())
            .chain(self.headers.iter().flat_map(|(k, v)| [k.as_str(), v.as_str()]))
    }

    async fn build(&self, req: &FlowNodeRequest) -> Result<HttpRequest> {
        let env = &req.env;
        let variables = match &self.variables {
            Some(raw) if !raw.trim().is_empty() => {
                let text = env.interpolate(raw).await?;
                serde_json::from_str::<Value>(&text).map_err(|e| {
                    FlowError::node_configuration(&self.name, format!("variables are not valid JSON: {}", e))
                })?
            }
            _ => json!({}),
        };
        let body = json!({
            "query": env.interpolate(&self.query).await?,
            "variables": variables,
        });

        let mut headers = interpolate_pairs(env, &self.headers).await?;
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            headers.insert("Content-Type".to_string(), "application/json".to_string());
        }
        Ok(HttpRequest {
            method: "POST".to_string(),
            url: env.interpolate(&self.url).await?,
            headers,
            query: Default::default(),
            body: Some(body.to_string()),
        })
    }
}

#[async_trait]
impl FlowNode for GraphQlNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::GraphQl
    }

    async fn run_sync(&self, ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        let request = match self.build(req).await {
            Ok(request) => request,
            Err(err) => return FlowNodeResult::failed(err),
        };
        let published_request = request_value(&request);
        let timeout = req.config.request_timeout();
        let (response, duration) = match exchange(ctx, self.client.as_ref(), request, timeout, &self.name).await {
            Ok(exchanged) => exchanged,
            Err(err) => return FlowNodeResult::failed(err),
        };

        let body = parse_body(&response.body);
        let mut shortcuts = Map::new();
        shortcuts.insert("data".to_string(), body.get("data").cloned().unwrap_or(Value::Null));
        shortcuts.insert("errors".to_string(), body.get("errors").cloned().unwrap_or(Value::Null));

        settle(
            req,
            Exchanged {
                node_id: self.id,
                name: &self.name,
                request: published_request,
                response: response_value(&response, duration),
                shortcuts,
                assertions: &self.assertions,
                side_channel: self.side_channel.as_ref(),
            },
        )
        .await
    }

    fn required_variables(&self) -> Vec<String> {
        let mut vars: Vec<String> = self.templates().flat_map(template_variables).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    fn ai_declarations(&self) -> Vec<AiDeclaration> {
        self.templates().flat_map(template_ai_declarations).collect()
    }

    fn output_variables(&self) -> Vec<String> {
        vec!["request".to_string(), "response".to_string()]
    }
}
