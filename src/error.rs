//! Error types for the noise engine

use crate::preset::PresetId;

/// Errors reported by the engine to its caller.
///
/// None of these ever cross the render callback; the audio thread degrades to
/// silence instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The output device could not be opened or started
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Durable storage could not be read, written or decoded
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A preset id that is not part of the collection
    #[error("No preset with id {0}")]
    InvalidPresetReference(PresetId),

    /// A preset name that is empty after trimming
    #[error("Preset name cannot be empty")]
    EmptyName,

    /// Engine configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn device(details: impl Into<String>) -> Self {
        Self::DeviceUnavailable(details.into())
    }

    pub fn persistence(details: impl Into<String>) -> Self {
        Self::PersistenceFailure(details.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::PersistenceFailure(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::PersistenceFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
