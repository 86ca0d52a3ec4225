//! Error types for RustDecoder.

use thiserror::Error;

/// Main error type for decoding operations.
#[derive(Error, Debug)]
pub enum DecError {
    /// Acoustic model (HMM set / duration model) loading errors. Fatal.
    #[error("Model error: {0}")]
    Model(String),

    /// Lexicon loading errors (unknown phone, malformed entry). Fatal.
    #[error("Lexicon error: {0}")]
    Lexicon(String),

    /// Language model loading or scoring errors. Fatal.
    #[error("Language model error: {0}")]
    LanguageModel(String),

    /// Per-frame acoustic input errors (truncated LNA file etc.).
    #[error("Acoustics error: {0}")]
    Acoustics(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// Word graph construction or serialization errors.
    #[error("Lattice error: {0}")]
    Lattice(String),

    /// Per-utterance decoding failure (beam emptied, no frames).
    /// Recoverable: the session continues with the next utterance.
    #[error("Decoding failed: {0}")]
    Decode(String),

    /// External tool (lattice/N-best) returned a non-zero status.
    #[error("External tool error: {0}")]
    External(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecError {
    /// Ошибка уровня одного высказывания: батч может продолжаться.
    ///
    /// Фатальные ошибки (модель/лексикон/LM/конфигурация) прекращают сессию.
    pub fn is_utterance_level(&self) -> bool {
        matches!(
            self,
            DecError::Decode(_) | DecError::Acoustics(_) | DecError::External(_)
        )
    }
}

/// Result type alias for decoding operations.
pub type DecResult<T> = Result<T, DecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_level_split() {
        assert!(DecError::Decode("beam emptied".into()).is_utterance_level());
        assert!(DecError::External("lattice-tool status 1".into()).is_utterance_level());
        assert!(!DecError::Lexicon("unknown phone".into()).is_utterance_level());
        assert!(!DecError::Model("bad header".into()).is_utterance_level());
    }
}
