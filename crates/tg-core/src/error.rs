use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transient remote error: {0}")]
    TransientRemote(String),

    #[error("Fatal remote error: {0}")]
    FatalRemote(String),

    #[error("Chat can no longer receive messages: {chat}")]
    DeadChat { chat: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session was reaped by the daemon")]
    Reaped,

    #[error("Invalid session reference: {0}")]
    InputInjection(String),

    #[error("Invalid channel address: {0}")]
    Address(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short error code string used in HTTP error envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Auth(_) => "AUTH_ERROR",
            Error::Protocol(_) => "PROTOCOL_ERROR",
            Error::TransientRemote(_) => "TRANSIENT_REMOTE",
            Error::FatalRemote(_) => "FATAL_REMOTE",
            Error::DeadChat { .. } => "DEAD_CHAT",
            Error::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Error::Reaped => "SESSION_REAPED",
            Error::InputInjection(_) => "INPUT_INJECTION",
            Error::Address(_) => "BAD_ADDRESS",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
