//! Error types for Genau

use thiserror::Error;

use crate::types::TurnState;

/// Result type alias using Genau's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in Genau
#[derive(Error, Debug)]
pub enum Error {
    /// Microphone, transcriber or synthesizer could not be reached
    #[error("Port unavailable: {0}")]
    PortUnavailable(String),

    #[error("Coaching service failed: {0}")]
    CoachingService(String),

    /// A command was issued in a state that does not accept it
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: TurnState,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for transport, status and decoding failures of a coaching call
    pub fn is_coaching_failure(&self) -> bool {
        matches!(
            self,
            Self::CoachingService(_) | Self::Network(_) | Self::Serialization(_)
        )
    }
}
