use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

/// Cancellation signal and optional deadline threaded through every store call.
///
/// Cloning a context shares its token, so cancelling any clone cancels them all.
#[derive(Clone, Debug, Default)]
pub struct Context {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// A context that is never past its deadline and is only cancelled explicitly.
    pub fn background() -> Context {
        Context::default()
    }

    /// A timeout too large to represent as an instant means no deadline at all.
    pub fn with_timeout(timeout: Duration) -> Context {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Context::with_deadline(deadline),
            None => Context::background(),
        }
    }

    pub fn with_deadline(deadline: Instant) -> Context {
        Context {
            deadline: Some(deadline),
            token: CancellationToken::new(),
        }
    }

    /// Tie this context to an existing token, e.g. one owned by the request handler.
    pub fn with_token(mut self, token: CancellationToken) -> Context {
        self.token = token;
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fail if the context has been cancelled or its deadline has been reached.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.token.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StoreError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    pub fn is_done(&self) -> bool {
        self.check().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_live_until_cancelled() {
        let ctx = Context::background();
        assert!(ctx.check().is_ok());
        assert!(ctx.remaining().is_none());

        let clone = ctx.clone();
        clone.cancel();
        assert!(matches!(ctx.check(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn zero_timeout_is_already_exceeded() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert!(matches!(ctx.check(), Err(StoreError::DeadlineExceeded)));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn shared_token_cancels_from_outside() {
        let token = CancellationToken::new();
        let ctx = Context::with_timeout(Duration::from_secs(60)).with_token(token.clone());
        assert!(!ctx.is_done());

        token.cancel();
        assert!(matches!(ctx.check(), Err(StoreError::Cancelled)));
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let ctx = Context::with_timeout(Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.check().is_ok());
    }
}
