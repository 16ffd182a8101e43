use crate::core::errors::{FlowError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Canceled from outside the flow
    Canceled,
    DeadlineExceeded,
    /// A throw node ended the flow
    Thrown,
    /// A sibling failed and the runner is draining
    Failure,
}

/// Cooperative cancellation scope passed to every node.
///
/// A child context is canceled when its parent is, and may carry a tighter
/// deadline. Canceling a child never affects the parent.
#[derive(Clone)]
pub struct FlowContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    budget: Option<Duration>,
    reason: Arc<Mutex<Option<CancelReason>>>,
    parent: Option<Arc<FlowContext>>,
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowContext {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            budget: None,
            reason: Arc::new(Mutex::new(None)),
            parent: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            budget: Some(timeout),
            ..Self::new()
        }
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            budget: self.budget,
            reason: Arc::new(Mutex::new(None)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Child whose deadline is the earlier of the current one and
    /// `now + timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let mut child = self.child();
        let candidate = Instant::now() + timeout;
        match self.deadline {
            Some(existing) if existing < candidate => {}
            _ => {
                child.deadline = Some(candidate);
                child.budget = Some(timeout);
            }
        }
        child
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut current = self.reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        self.token.cancel();
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline_passed()
    }

    /// Why the context ended, walking up to the ancestor that was canceled.
    pub fn reason(&self) -> Option<CancelReason> {
        if let Some(reason) = *self.reason.lock() {
            return Some(reason);
        }
        if self.token.is_cancelled() {
            if let Some(parent) = &self.parent {
                if let Some(reason) = parent.reason() {
                    return Some(reason);
                }
            }
            return Some(CancelReason::Canceled);
        }
        if self.deadline_passed() {
            return Some(CancelReason::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// The error a node should return once the context has ended.
    pub fn error(&self, operation: &str) -> FlowError {
        match self.reason() {
            Some(CancelReason::DeadlineExceeded) => {
                FlowError::timeout(operation, self.budget.unwrap_or_default())
            }
            _ => FlowError::canceled(operation),
        }
    }

    /// Fails fast when the context has already ended.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(self.error(operation));
        }
        Ok(())
    }

    /// Run `future` unless the context ends first.
    pub async fn run<F, T>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        self.check(operation)?;
        tokio::select! {
            biased;
            _ = self.done() => Err(self.error(operation)),
            value = future => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_child_observes_parent_cancellation() {
        let parent = FlowContext::new();
        let child = parent.child();
        parent.cancel(CancelReason::Thrown);
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some(CancelReason::Thrown));
        child.done().await;
    }

    #[tokio::test]
    async fn test_child_cancellation_is_local() {
        let parent = FlowContext::new();
        let child = parent.child();
        child.cancel(CancelReason::Failure);
        assert!(!parent.is_cancelled());
        assert_eq!(child.reason(), Some(CancelReason::Failure));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_run() {
        let ctx = FlowContext::with_timeout(Duration::from_millis(20));
        let result = ctx
            .run("sleep", tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(FlowError::Timeout { .. })));
        assert_eq!(ctx.reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_child_deadline_never_extends_parent() {
        let parent = FlowContext::with_timeout(Duration::from_millis(50));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
