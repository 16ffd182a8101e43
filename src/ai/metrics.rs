use super::llm::ContentChoice;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const PROMPT_KEYS: [&str; 6] = [
    "PromptTokens",
    "prompt_tokens",
    "promptTokens",
    "InputTokens",
    "input_tokens",
    "inputTokens",
];

const COMPLETION_KEYS: [&str; 6] = [
    "CompletionTokens",
    "completion_tokens",
    "completionTokens",
    "OutputTokens",
    "output_tokens",
    "outputTokens",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

fn first_count(info: &Map<String, Value>, keys: &[&str]) -> u64 {
    let direct = keys.iter().find_map(|k| info.get(*k).and_then(Value::as_u64));
    if let Some(count) = direct {
        return count;
    }
    match info.get("usage") {
        Some(Value::Object(usage)) => first_count(usage, keys),
        _ => 0,
    }
}

/// Token counts from one choice's generation info, whichever naming the
/// vendor uses. A nested `usage` object is consulted when the keys are not
/// at top level.
pub fn extract_usage(info: &Map<String, Value>) -> TokenUsage {
    TokenUsage {
        prompt: first_count(info, &PROMPT_KEYS),
        completion: first_count(info, &COMPLETION_KEYS),
    }
}

/// Usage summed over every returned choice.
pub fn usage_of(choices: &[ContentChoice]) -> TokenUsage {
    choices.iter().fold(TokenUsage::default(), |acc, choice| {
        let usage = extract_usage(&choice.generation_info);
        TokenUsage {
            prompt: acc.prompt + usage.prompt,
            completion: acc.completion + usage.completion,
        }
    })
}

/// Totals accumulated across an agent's tool-call loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiMetrics {
    #[serde(rename = "PromptTokens")]
    pub prompt_tokens: u64,
    #[serde(rename = "CompletionTokens")]
    pub completion_tokens: u64,
    #[serde(rename = "TotalTokens")]
    pub total_tokens: u64,
    #[serde(rename = "LLMCalls")]
    pub llm_calls: u64,
    #[serde(rename = "ToolCalls")]
    pub tool_calls: u64,
}

impl AiMetrics {
    pub fn record_call(&mut self, usage: TokenUsage) {
        self.llm_calls += 1;
        self.prompt_tokens += usage.prompt;
        self.completion_tokens += usage.completion;
        self.total_tokens += usage.total();
    }

    pub fn record_tool_call(&mut self) {
        self.tool_calls += 1;
    }

    /// Metrics of a single provider call.
    pub fn for_call(usage: TokenUsage) -> Self {
        let mut metrics = Self::default();
        metrics.record_call(usage);
        metrics
    }
}
