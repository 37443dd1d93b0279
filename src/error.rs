/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum TableStorageError {
    /// Missing or malformed connection string.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Invalid query or cache policy, reported before any request is sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code returned by the table service.
    #[error("http error {status}: {message}")]
    Http {
        status: u16,
        /// Service error code such as `TableNotFound`, when the body carried one.
        code: Option<String>,
        /// Service error message, or the raw response body.
        message: String,
    },
    /// Response decoding or entity mapping error.
    #[error("decode error: {0}")]
    Decode(String),
    /// The background query task panicked or was cancelled.
    #[error("query task failed: {0}")]
    Task(String),
}

impl TableStorageError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}
