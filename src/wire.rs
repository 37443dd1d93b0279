use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CreateTableRequest<'a> {
    #[serde(rename = "TableName")]
    pub table_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub value: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "odata.error")]
    pub error: ODataError,
}

#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub code: Option<String>,
    pub message: Option<ErrorMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorMessage {
    pub value: String,
}

/// Extracts code and message from an OData error body, falling back to the raw body.
pub fn parse_error_body(body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => {
            let message = parsed
                .error
                .message
                .map(|message| message.value)
                .unwrap_or_else(|| body.to_owned());
            (parsed.error.code, message)
        }
        Err(_) => (None, body.to_owned()),
    }
}
