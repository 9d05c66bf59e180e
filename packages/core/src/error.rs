//! Errors raised by an engine.

/// Errors reported by a JSON key-value engine.
///
/// `Structural` covers everything the engine rejects because of the shape of
/// the stored value (missing container, wrong type, missing path on get).
/// `Connection` covers transport failures and is never retried here.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("structural error: {message}")]
    Structural { message: String },

    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl EngineError {
    pub fn structural(message: impl Into<String>) -> Self {
        EngineError::Structural {
            message: message.into(),
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, EngineError::Structural { .. })
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Connection(Box::new(e))
    }
}
