/// Default `x-ms-version` sent with every table request.
pub const DEFAULT_API_VERSION: &str = "2019-02-02";

/// Configures HTTP timeout and service version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Table service REST API version.
    pub api_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            api_version: DEFAULT_API_VERSION.to_owned(),
        }
    }
}
