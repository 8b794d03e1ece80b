use tokio_util::sync::CancellationToken;

/// Returned once a render has been cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("render cancelled")]
pub struct Cancelled;

/// Shared per-render context handed to generators, filters and transformers.
///
/// Cloning is cheap; clones observe the same cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
}

impl Context {
    pub fn new() -> Self { Self::default() }

    pub fn with_token(cancel: CancellationToken) -> Self { Self { cancel } }

    /// Derive a context that is cancelled with its parent but can also be cancelled alone.
    pub fn child(&self) -> Self { Self { cancel: self.cancel.child_token() } }

    pub fn cancel(&self) { self.cancel.cancel() }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) { self.cancel.cancelled().await }

    pub fn token(&self) -> &CancellationToken { &self.cancel }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();
        assert!(child.check().is_ok());
        parent.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check(), Err(Cancelled));
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }
}
