use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// This adapter does not implement the requested capability. Callers
    /// degrade gracefully.
    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),

    /// The underlying transport could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The channel rejected the supplied credentials or token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A specific chat can no longer receive messages (bot kicked, chat
    /// deleted, …). The router detaches sessions from it.
    #[error("Chat is dead: {chat}: {reason}")]
    DeadChat { chat: String, reason: String },

    /// Another poller holds this token ("409 conflict: terminated by other
    /// getUpdates"). Fatal for this adapter's poller.
    #[error("Polling conflict: {0}")]
    Conflict(String),

    /// 5xx or transport-level failure worth retrying.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// An operation exceeded its allowed time budget.
    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The channel-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ChannelError {
    /// True for failures that should be retried with backoff rather than
    /// escalated.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient(_) | ChannelError::Timeout { .. })
    }
}
