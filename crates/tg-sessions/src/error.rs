use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session limit reached ({max})")]
    LimitReached { max: usize },

    #[error("User {user} may not drive session {session}")]
    AccessDenied { user: String, session: String },
}

pub type Result<T> = std::result::Result<T, SessionError>;
