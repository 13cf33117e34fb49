/// Domain errors raised by the scheduler and its collaborators
///
/// Plumbing failures (config, HTTP, startup) stay on `anyhow`; these are the
/// errors the control API needs to tell apart.

use thiserror::Error;

use crate::models::PostStatus;

#[derive(Debug, Error)]
pub enum AutomationError {
    /// Malformed request or out-of-range input
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unknown post id: {0}")]
    UnknownPost(String),

    #[error("no automation running for account {0}")]
    UnknownAccount(String),

    #[error("post {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: PostStatus,
        to: PostStatus,
    },

    #[error("no pending posts found for account {0}")]
    NoPendingPosts(String),

    /// The AI provider or profile backend failed
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl AutomationError {
    /// Wrap an `anyhow` chain from a network call
    pub fn upstream(err: anyhow::Error) -> Self {
        AutomationError::Upstream(format!("{:#}", err))
    }
}
