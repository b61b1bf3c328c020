//! Per-request execution context: owning session, cancellation and deadline

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::CommandError;

/// Identifies the client session (a wire connection or one HTTP request)
pub type SessionId = u64;

/// Carried by every command from dispatch down to backend calls
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: SessionId,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    #[must_use]
    pub fn new(session: SessionId, cancel: CancellationToken) -> Self {
        Self {
            session,
            cancel,
            deadline: None,
        }
    }

    /// Tighten the deadline to `timeout` from now; never loosens it
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(current) if current < candidate => current,
            _ => candidate,
        });
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `work` until it finishes, the request is cancelled, or the
    /// deadline passes.
    ///
    /// `work` is dropped on cancellation or timeout; callers owning state that
    /// `work` was mutating must clean it up.
    pub async fn run<T, F>(&self, work: F) -> Result<T, CommandError>
    where
        F: Future<Output = Result<T, CommandError>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, work)
                    .await
                    .map_err(|_| CommandError::max_time_expired())?,
                None => work.await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CommandError::interrupted()),
            result = bounded => result,
        }
    }
}
