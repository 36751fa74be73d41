use thiserror::Error;

/// Main error type for Refgraph
#[derive(Error, Debug)]
pub enum RefgraphError {
    /// Asset index (SQLite) errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (bad request)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown or evicted job id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A job finished in the error state
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Waiting on a job exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The home execution context is gone or dropped the task
    #[error("Home context unavailable: {0}")]
    HomeUnavailable(String),

    /// Graph data source failures
    #[error("Graph error: {0}")]
    Graph(String),

    /// Unexpected response from a refgraph server
    #[error("Server error: {0}")]
    Server(String),
}

/// Convenient Result type using RefgraphError
pub type Result<T> = std::result::Result<T, RefgraphError>;
