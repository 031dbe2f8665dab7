use thiserror::Error;

/// A convenience `Result` alias using [`TavernError`].
pub type TavernResult<T> = Result<T, TavernError>;

/// Top-level error type for tavern.
///
/// Variants follow the outcome classes surfaced to the transport: lookups that
/// miss, malformed requests, generator failures and infrastructure failures.
#[derive(Error, Debug)]
pub enum TavernError {
    /// A session or connection was absent on a read.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The transport verb is not supported.
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// The inbound action is malformed or empty.
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// The external generator failed in any way.
    #[error("Generation failed: {0}")]
    Generation(String),

    /// The generator did not finish within the configured bound.
    #[error("Timed out after {0}s")]
    Timeout(u64),

    /// The persistent store rejected or failed an operation.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TavernError {
    /// Whether this error comes from the storage or network layer rather than
    /// from the request itself.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, TavernError::Store(_) | TavernError::Io(_))
    }
}
