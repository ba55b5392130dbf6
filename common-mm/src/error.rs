use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Engine-level error kinds shared by every service crate.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The rules document was absent at startup. Fatal: the engine refuses
    /// to start without it.
    #[error("rules document not found at '{path}'")]
    ConfigMissing { path: String },

    #[error("rules document is malformed: {0}")]
    ConfigInvalid(String),

    #[error("unknown game mode '{0}'")]
    UnknownMode(String),

    #[error("invalid ticket: {0}")]
    InvalidTicket(String),

    #[error("ticket store failure: {0}")]
    Store(String),
}

impl EngineError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}
