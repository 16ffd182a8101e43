use super::http::{
    exchange, interpolate_pairs, request_value, response_value, settle, Assertion, Exchanged,
    HttpClient, HttpRequest, SideChannel,
};
use crate::core::errors::Result;
use crate::core::id::Id;
use crate::expr::{template_ai_declarations, template_variables, AiDeclaration};
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, NodeKind};
use async_trait::async_trait;
use serde_json::Map;
use std::sync::Arc;

/// One HTTP exchange. Publishes `request.*` and `response.*` under its name.
pub struct RequestNode {
    id: Id,
    name: String,
    method: String,
    url: String,
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<String>,
    assertions: Vec<Assertion>,
    client: Arc<dyn HttpClient>,
    side_channel: Option<SideChannel>,
}

impl RequestNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            method: method.into(),
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            assertions: Vec::new(),
            client,
            side_channel: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
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
        [self.method.as_str(), self.url.as_str()]
            .into_iter()
            .chain(self.headers.iter().chain(&self.query).flat_map(|(k, v)| [k.as_str(), v.as_str()]))
            .chain(self.body.as_deref())
    }

    async fn build(&self, req: &FlowNodeRequest) -> Result<HttpRequest> {
        let env = &req.env;
        let body = match &self.body {
            Some(body) => Some(env.interpolate(body).await?),
            None => None,
        };
        Ok(HttpRequest {
            method: env.interpolate(&self.method).await?.to_uppercase(),
            url: env.interpolate(&self.url).await?,
            headers: interpolate_pairs(env, &self.headers).await?,
            query: interpolate_pairs(env, &self.query).await?,
            body,
        })
    }
}

#[async_trait]
impl FlowNode for RequestNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Request
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

        settle(
            req,
            Exchanged {
                node_id: self.id,
                name: &self.name,
                request: published_request,
                response: response_value(&response, duration),
                shortcuts: Map::new(),
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
        ["url", "method", "headers", "query", "body"]
            .iter()
            .map(|f| format!("request.{}", f))
            .chain(
                ["status", "headers", "body", "duration"]
                    .iter()
                    .map(|f| format!("response.{}", f)),
            )
            .collect()
    }
}
