pub mod condition;
pub mod for_each;
pub mod for_loop;
pub mod graphql;
pub mod http;
pub mod javascript;
pub mod loop_support;
pub mod noop;
pub mod request;
pub mod throw;

pub use condition::ConditionNode;
pub use for_each::ForEachNode;
pub use for_loop::ForLoopNode;
pub use graphql::GraphQlNode;
pub use http::{
    Assertion, AssertionResult, HttpClient, HttpRequest, HttpResponse, ResponseRecord, SideChannel,
    SideChannelMessage,
};
pub use javascript::{JavaScriptNode, JsExecutor};
pub use loop_support::{BreakCondition, Comparison, ErrorHandling, LoopSettings};
pub use noop::StartNode;
pub use request::RequestNode;
pub use throw::ThrowNode;

use crate::expr::{has_vars, referenced_paths, template_variables};

/// Variables read by a node setting that is either a bare expression or a
/// `{{ ... }}` template.
pub(crate) fn expression_variables(source: &str) -> Vec<String> {
    if has_vars(source) {
        template_variables(source)
    } else {
        referenced_paths(source).unwrap_or_default()
    }
}
