/// Errors that can occur while loading or checking board descriptors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A descriptor file could not be loaded.
    #[error("failed to load board descriptor: {0}")]
    LoadFailed(String),

    /// The embedded descriptor schema could not be compiled.
    #[error("failed to compile board schema: {0}")]
    CompileFailed(String),

    /// A descriptor failed schema validation.
    #[error("board descriptor {name} is invalid: {message}")]
    ValidationFailed { name: String, message: String },

    /// A descriptor passed the schema but its fields contradict each other.
    #[error("board descriptor {name} is inconsistent: {message}")]
    Inconsistent { name: String, message: String },

    /// The document is not valid JSON or does not map onto a descriptor.
    #[error("board descriptor is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// No preset or catalog entry with this name.
    #[error("unknown board: {0}")]
    UnknownBoard(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
