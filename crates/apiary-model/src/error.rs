//! Errors for the data model and its persistence.

/// Errors surfaced while reading or writing model JSON files.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize JSON for {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
