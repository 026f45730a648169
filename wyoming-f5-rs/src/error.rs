use thiserror::Error;

use crate::engine::EngineError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event '{event_type}' is missing required field '{field}'")]
    MissingField {
        event_type: String,
        field: &'static str,
    },

    #[error("Event header exceeds {limit} bytes")]
    HeaderTooLong { limit: usize },
}

/// Anything that can go wrong while handling one client event.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Synthesis worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Client disconnected")]
    Disconnected,
}

impl HandlerError {
    /// Stable name sent to clients as the `code` of an error event.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::Engine(_) => "EngineError",
            HandlerError::Protocol(_) => "ProtocolError",
            HandlerError::Worker(_) => "WorkerError",
            HandlerError::Disconnected => "Disconnected",
        }
    }
}
