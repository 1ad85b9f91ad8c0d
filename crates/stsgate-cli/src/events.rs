//! Invocation payloads shared by the one-shot commands and the HTTP endpoint.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use stsgate_core::{Error, Result};

/// A request carrying one opaque token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

impl TokenRequest {
    /// Parse an invocation payload. Anything that is not `{"token": "..."}`
    /// is a malformed token.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let request: TokenRequest = serde_json::from_slice(body)
            .map_err(|e| Error::MalformedToken(format!("invalid request body: {e}")))?;
        if request.token.trim().is_empty() {
            return Err(Error::MalformedToken("empty token".into()));
        }
        Ok(request)
    }
}

/// Error body returned to callers: the error code only.
pub fn error_body(err: &Error) -> Value {
    json!({ "error": err.code() })
}
