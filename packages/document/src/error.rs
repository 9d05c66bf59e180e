use jsonipc_core::{EngineError, PathError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("path error: {0}")]
    Path(#[from] PathError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("inconsistent document key: expected {expected}, found {found}")]
    InconsistentKey { expected: String, found: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Whether the engine rejected the operation because of the stored shape.
    pub fn is_structural(&self) -> bool {
        matches!(self, Error::Engine(e) if e.is_structural())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_detection() {
        let e: Error = EngineError::structural("missing").into();
        assert!(e.is_structural());
        assert!(e.to_string().contains("missing"));

        let e: Error = PathError::TrailingSeparator {
            path: "a.".to_string(),
        }
        .into();
        assert!(!e.is_structural());
        assert!(e.to_string().starts_with("path error"));
    }

    #[test]
    fn inconsistent_key_display() {
        let e = Error::InconsistentKey {
            expected: "_ipc_a".to_string(),
            found: "_ipc_b".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "inconsistent document key: expected _ipc_a, found _ipc_b"
        );
    }
}
