use super::llm::ChatMessage;
use crate::core::id::Id;
use crate::flow::{FlowContext, FlowNode, FlowNodeRequest, FlowNodeResult, Handle, NodeKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RetentionPolicy {
    /// Keep the most recent `size` messages
    WindowBuffer { size: usize },
}

/// Passive node holding the conversation history of an adjacent AI node.
pub struct AiMemoryNode {
    id: Id,
    name: String,
    policy: RetentionPolicy,
    messages: Mutex<VecDeque<ChatMessage>>,
}

impl AiMemoryNode {
    pub fn new(id: Id, name: impl Into<String>, policy: RetentionPolicy) -> Self {
        Self {
            id,
            name: name.into(),
            policy,
            messages: Mutex::new(VecDeque::new()),
        }
    }

    pub fn window(id: Id, name: impl Into<String>, size: usize) -> Self {
        Self::new(id, name, RetentionPolicy::WindowBuffer { size })
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Append and trim under one lock.
    pub fn add_message(&self, message: ChatMessage) {
        let mut messages = self.messages.lock();
        messages.push_back(message);
        match self.policy {
            RetentionPolicy::WindowBuffer { size } => {
                while messages.len() > size {
                    messages.pop_front();
                }
            }
        }
    }

    pub fn get_messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
    }
}

#[async_trait]
impl FlowNode for AiMemoryNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AiMemory
    }

    async fn run_sync(&self, _ctx: &FlowContext, req: &FlowNodeRequest) -> FlowNodeResult {
        FlowNodeResult::next(req.targets(self.id, Handle::Unspecified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_window_keeps_latest_in_order() {
        let memory = AiMemoryNode::window(Id::new(), "Memory", 3);
        for i in 0..5 {
            memory.add_message(ChatMessage::user(format!("m{}", i)));
        }
        let contents: Vec<String> = memory.get_messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_clear() {
        let memory = AiMemoryNode::window(Id::new(), "Memory", 2);
        memory.add_message(ChatMessage::user("hi"));
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_concurrent_adds_respect_window() {
        let memory = Arc::new(AiMemoryNode::window(Id::new(), "Memory", 4));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let memory = memory.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        memory.add_message(ChatMessage::assistant(format!("{}-{}", t, i)));
                        assert!(memory.len() <= 4);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(memory.len(), 4);
    }
}
